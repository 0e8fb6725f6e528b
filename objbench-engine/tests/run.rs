//! End-to-end runs of the orchestrator against scripted and in-memory backends.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use objbench_engine::backend::{InMemoryBackend, SharedBackend};
use objbench_engine::{
    MIN_SUCCESSFUL_UPLOADS, NoopObserver, Orchestrator, Pause, PayloadMode, Phase, RunConfig,
    RunError, WorkItem, object_key,
};

mod common;

use common::{Event, RecordingObserver, ScriptedBackend};

fn config(threads: usize, secs: u64) -> objbench_engine::RunConfigBuilder {
    RunConfig::builder()
        .object_size(2048)
        .threads(threads)
        .duration(Duration::from_secs(secs))
}

fn orchestrator(config: RunConfig, backend: &Arc<ScriptedBackend>) -> Orchestrator {
    let shared: SharedBackend = backend.clone();
    Orchestrator::new(config, shared)
}

#[tokio::test(start_paused = true)]
async fn full_run_cleans_up_after_every_loop() {
    objbench_test::tracing::init();

    let backend = Arc::new(ScriptedBackend::new(Duration::from_millis(30)));
    let config = config(4, 1).loops(2).build().unwrap();
    let mut observer = RecordingObserver::default();

    let summary = orchestrator(config, &backend)
        .run(&mut observer)
        .await
        .unwrap();

    assert!(backend.is_prepared());
    assert_eq!(backend.stored(), 0);
    assert_eq!(summary.loops.len(), 2);

    for (index, summary) in summary.loops.iter().enumerate() {
        assert_eq!(summary.loop_index, index as u32 + 1);
        assert_eq!(summary.upload.phase, Phase::Upload);
        assert_eq!(summary.download.phase, Phase::Download);
        assert!(summary.upload.successful >= MIN_SUCCESSFUL_UPLOADS);
        assert!(summary.download.successful > 0);
        assert_eq!(summary.upload.total_bytes, summary.upload.successful as u64 * 2048);
        assert_eq!(summary.delete.attempted, summary.upload.successful);
        assert_eq!(summary.delete.failed, 0);
    }

    assert_eq!(
        observer.phases_started(),
        vec![Phase::Upload, Phase::Download, Phase::Upload, Phase::Download]
    );
    assert_eq!(observer.events.first(), Some(&Event::LoopStarted(1)));
    assert_eq!(observer.events.last(), Some(&Event::LoopFinished(2)));
    assert_eq!(
        observer.delete_progress,
        summary.loops.iter().map(|l| l.delete.attempted).sum::<usize>()
    );
    assert!(observer.pauses().is_empty());
}

#[tokio::test(start_paused = true)]
async fn downloads_only_target_uploaded_objects() {
    let failing = object_key("Object", WorkItem::new(2));
    let backend = Arc::new(
        ScriptedBackend::new(Duration::from_millis(30)).fail_uploads_of(failing.clone()),
    );
    let config = config(4, 1).build().unwrap();

    let summary = orchestrator(config, &backend)
        .run(&mut NoopObserver)
        .await
        .unwrap();

    let uploaded: HashSet<_> = backend.uploaded().into_iter().collect();
    let downloaded = backend.downloaded();
    assert!(!downloaded.is_empty());
    assert!(downloaded.iter().all(|key| uploaded.contains(key)));
    assert!(!uploaded.contains(&failing));

    let upload = &summary.loops[0].upload;
    assert!(upload.failed > 0);
    assert_eq!(summary.loops[0].delete.attempted, upload.successful);
}

#[tokio::test(start_paused = true)]
async fn too_few_uploads_abort_before_downloading() {
    let backend = Arc::new(ScriptedBackend::new(Duration::from_millis(30)).upload_limit(3));
    let config = config(2, 1).loops(3).build().unwrap();
    let mut observer = RecordingObserver::default();

    let err = orchestrator(config, &backend)
        .run(&mut observer)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RunError::InsufficientUploads {
            loop_index: 1,
            successful: 3,
            required: MIN_SUCCESSFUL_UPLOADS,
        }
    ));
    assert_eq!(observer.phases_started(), vec![Phase::Upload]);
    assert!(backend.downloaded().is_empty());

    let Some(Event::PhaseFinished(1, stats)) = observer.events.last() else {
        panic!("upload statistics were not reported");
    };
    assert_eq!(stats.successful, 3);
    assert!(stats.failed > 0);
}

#[tokio::test(start_paused = true)]
async fn wrong_response_sizes_fail_all_downloads() {
    let backend = Arc::new(ScriptedBackend::new(Duration::from_millis(30)).download_size(1));
    let config = config(2, 1).build().unwrap();

    let err = orchestrator(config, &backend)
        .run(&mut NoopObserver)
        .await
        .unwrap_err();

    let RunError::AllDownloadsFailed { loop_index, failed } = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(loop_index, 1);
    assert!(failed > 0);
}

#[tokio::test(start_paused = true)]
async fn prepare_failure_is_fatal() {
    let backend = Arc::new(ScriptedBackend::new(Duration::from_millis(30)).fail_prepare());
    let config = config(2, 1).build().unwrap();
    let mut observer = RecordingObserver::default();

    let err = orchestrator(config, &backend)
        .run(&mut observer)
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Prepare(_)));
    assert!(observer.events.is_empty());
    assert!(backend.uploaded().is_empty());
}

#[tokio::test(start_paused = true)]
async fn delete_failures_are_not_fatal() {
    let backend = Arc::new(ScriptedBackend::new(Duration::from_millis(30)).fail_deletes());
    let config = config(2, 1).build().unwrap();

    let summary = orchestrator(config, &backend)
        .run(&mut NoopObserver)
        .await
        .unwrap();

    let delete = &summary.loops[0].delete;
    assert!(delete.attempted > 0);
    assert_eq!(delete.failed, delete.attempted);
    assert_eq!(delete.deleted(), 0);
    assert_eq!(backend.stored(), delete.attempted);
}

#[tokio::test(start_paused = true)]
async fn pauses_between_phases_and_loops() {
    let backend = Arc::new(ScriptedBackend::new(Duration::from_millis(30)));
    let config = config(2, 1)
        .loops(2)
        .pause_between_phases(true)
        .build()
        .unwrap();
    let mut observer = RecordingObserver::default();

    orchestrator(config, &backend)
        .run(&mut observer)
        .await
        .unwrap();

    assert_eq!(
        observer.pauses(),
        vec![
            Pause::BeforeDownload,
            Pause::BeforeDelete,
            Pause::BetweenLoops { completed: 1 },
            Pause::BeforeDownload,
            Pause::BeforeDelete,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn streamed_multipart_run_in_memory() {
    let backend = InMemoryBackend::new()
        .with_latency(Duration::from_millis(7))
        .with_multipart(
            RunConfig::builder()
                .object_size(1000)
                .multipart(true, 400)
                .build()
                .unwrap()
                .multipart(),
        );
    let config = RunConfig::builder()
        .object_size(1000)
        .multipart(true, 400)
        .payload_mode(PayloadMode::Streamed)
        .threads(3)
        .duration(Duration::from_secs(1))
        .build()
        .unwrap();

    let shared: SharedBackend = Arc::new(backend.clone());
    let summary = Orchestrator::new(config, shared)
        .run(&mut NoopObserver)
        .await
        .unwrap();

    let summary = &summary.loops[0];
    assert!(summary.upload.successful >= MIN_SUCCESSFUL_UPLOADS);
    assert!(summary.download.successful > 0);
    assert_eq!(summary.download.failed, 0);
    assert!(backend.parts_staged() >= summary.upload.successful * 3);
    assert!(backend.is_empty());
}
