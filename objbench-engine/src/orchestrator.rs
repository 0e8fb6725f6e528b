//! Sequencing of phases and loops.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backend::SharedBackend;
use crate::config::RunConfig;
use crate::error::RunError;
use crate::id::{WorkItem, object_key};
use crate::observer::{Pause, RunObserver};
use crate::payload::PayloadSource;
use crate::phase::{PhaseOutcome, run_phase};
use crate::stats::{DeleteStats, LoopSummary, PhaseStats, RunSummary, successful_ids};
use crate::transfer::Phase;
use crate::worker::Operation;

/// The minimum number of successful uploads required to start the download phase.
pub const MIN_SUCCESSFUL_UPLOADS: usize = 5;

/// Deletions between two progress log lines.
const DELETE_PROGRESS_INTERVAL: usize = 1000;

/// Mutable state of a run, owned by the orchestrator alone.
#[derive(Debug, Default)]
struct RunState {
    /// Identifiers uploaded successfully in the current loop, in arrival order.
    successful_uploads: Arc<[WorkItem]>,
    summary: RunSummary,
}

/// Runs the upload, download and delete phases of every loop against a backend.
///
/// The payload is created once per run. Each loop uploads fresh objects until the phase budget
/// runs out, cycles through the uploaded objects with downloads for another budget and finally
/// deletes every uploaded object one by one.
#[derive(Debug)]
pub struct Orchestrator {
    config: RunConfig,
    backend: SharedBackend,
}

impl Orchestrator {
    /// Creates an orchestrator for the given configuration and backend.
    pub fn new(config: RunConfig, backend: SharedBackend) -> Self {
        Self { config, backend }
    }

    /// The configuration of the run.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Executes all loops and returns their statistics.
    ///
    /// Stops at the first fatal condition. Objects uploaded in the aborted loop are not deleted.
    pub async fn run(&self, observer: &mut dyn RunObserver) -> Result<RunSummary, RunError> {
        tracing::info!(backend = self.backend.name(), "preparing storage");
        self.backend.prepare().await.map_err(RunError::Prepare)?;

        let payload = self.config.payload_source();
        let mut state = RunState::default();

        for loop_index in 1..=self.config.loops() {
            if loop_index > 1 {
                self.pause(observer, Pause::BetweenLoops {
                    completed: loop_index - 1,
                })
                .await;
            }

            let summary = self
                .run_loop(loop_index, &payload, &mut state, observer)
                .await?;
            observer.loop_finished(&summary);
            state.summary.loops.push(summary);
        }

        Ok(state.summary)
    }

    async fn run_loop(
        &self,
        loop_index: u32,
        payload: &PayloadSource,
        state: &mut RunState,
        observer: &mut dyn RunObserver,
    ) -> Result<LoopSummary, RunError> {
        tracing::info!(loop_index, "starting loop");
        observer.loop_started(loop_index);

        observer.phase_started(loop_index, Phase::Upload);
        let operation = Operation::Upload {
            payload: payload.clone(),
        };
        let outcome = run_phase(&self.config, &self.backend, operation).await;
        let upload = self.phase_stats(&outcome);
        observer.phase_finished(loop_index, &upload);

        state.successful_uploads = successful_ids(&outcome.results).into();
        if state.successful_uploads.len() < MIN_SUCCESSFUL_UPLOADS {
            return Err(RunError::InsufficientUploads {
                loop_index,
                successful: state.successful_uploads.len(),
                required: MIN_SUCCESSFUL_UPLOADS,
            });
        }

        self.pause(observer, Pause::BeforeDownload).await;

        observer.phase_started(loop_index, Phase::Download);
        let operation = Operation::Download {
            targets: Arc::clone(&state.successful_uploads),
            object_size: self.config.object_size(),
        };
        let outcome = run_phase(&self.config, &self.backend, operation).await;
        let download = self.phase_stats(&outcome);
        observer.phase_finished(loop_index, &download);

        if download.successful == 0 {
            return Err(RunError::AllDownloadsFailed {
                loop_index,
                failed: download.failed,
            });
        }

        self.pause(observer, Pause::BeforeDelete).await;

        let delete = self
            .delete_uploads(loop_index, &state.successful_uploads, observer)
            .await;

        Ok(LoopSummary {
            loop_index,
            upload,
            download,
            delete,
        })
    }

    fn phase_stats(&self, outcome: &PhaseOutcome) -> PhaseStats {
        let stats = PhaseStats::from_results(
            outcome.phase,
            &outcome.results,
            self.config.object_size(),
            self.config.threads(),
            outcome.elapsed,
        );

        tracing::info!(
            phase = %stats.phase,
            successful = stats.successful,
            failed = stats.failed,
            mbps = stats.throughput_mbps(),
            "phase completed"
        );

        stats
    }

    /// Deletes uploaded objects sequentially. Failures are logged and counted, but never fatal.
    async fn delete_uploads(
        &self,
        loop_index: u32,
        ids: &[WorkItem],
        observer: &mut dyn RunObserver,
    ) -> DeleteStats {
        // deletion is not time-boxed, so this token never fires
        let cancel = CancellationToken::new();
        let total = ids.len();

        tracing::info!(loop_index, objects = total, "deleting test objects");
        observer.delete_started(loop_index, total);

        let start = Instant::now();
        let mut stats = DeleteStats {
            attempted: total,
            ..DeleteStats::default()
        };

        for (index, id) in ids.iter().enumerate() {
            if index > 0 && index % DELETE_PROGRESS_INTERVAL == 0 {
                tracing::info!(loop_index, completed = index, "deletes completed");
            }

            let key = object_key(self.config.prefix(), *id);
            if let Err(error) = self.backend.delete(&cancel, &key).await {
                stats.failed += 1;
                tracing::warn!(
                    %key,
                    error = &error as &dyn std::error::Error,
                    "failed to delete object"
                );
            }

            observer.delete_progress(index + 1, total);
        }

        stats.elapsed = start.elapsed();
        observer.delete_finished(loop_index, &stats);
        stats
    }

    async fn pause(&self, observer: &mut dyn RunObserver, pause: Pause) {
        if self.config.pause_between_phases() {
            tracing::debug!(?pause, "waiting for confirmation");
            observer.pause(pause).await;
        }
    }
}
