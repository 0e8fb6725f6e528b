//! Backends and observers shared by the run tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use objbench_engine::backend::{Backend, BackendError, BackendResult};
use objbench_engine::payload::Payload;
use objbench_engine::{DeleteStats, LoopSummary, Pause, Phase, PhaseStats, RunObserver};
use tokio_util::sync::CancellationToken;

/// A backend with scripted failures that records every call.
///
/// All calls take `latency` so paused-time tests make progress.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    latency: Duration,
    fail_prepare: bool,
    failing_uploads: HashSet<String>,
    upload_limit: Option<usize>,
    download_size: Option<u64>,
    fail_deletes: bool,
    prepared: AtomicBool,
    objects: Mutex<HashMap<String, u64>>,
    uploaded: Mutex<Vec<String>>,
    downloaded: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            ..Default::default()
        }
    }

    pub fn fail_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    /// Always rejects uploads of the given key.
    pub fn fail_uploads_of(mut self, key: impl Into<String>) -> Self {
        self.failing_uploads.insert(key.into());
        self
    }

    /// Rejects all uploads once `limit` uploads have succeeded.
    pub fn upload_limit(mut self, limit: usize) -> Self {
        self.upload_limit = Some(limit);
        self
    }

    /// Reports the given byte count for every download.
    pub fn download_size(mut self, size: u64) -> Self {
        self.download_size = Some(size);
        self
    }

    pub fn fail_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.load(Ordering::SeqCst)
    }

    /// Keys of all successful uploads in completion order.
    pub fn uploaded(&self) -> Vec<String> {
        self.uploaded.lock().unwrap().clone()
    }

    /// Keys of all successful downloads in completion order.
    pub fn downloaded(&self) -> Vec<String> {
        self.downloaded.lock().unwrap().clone()
    }

    /// Number of objects currently stored.
    pub fn stored(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    async fn wait(&self, cancel: &CancellationToken) -> BackendResult<()> {
        cancel
            .run_until_cancelled(tokio::time::sleep(self.latency))
            .await
            .ok_or(BackendError::Cancelled)
    }
}

#[async_trait::async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn prepare(&self) -> BackendResult<()> {
        if self.fail_prepare {
            return Err(BackendError::UnexpectedResponse("bucket missing".into()));
        }
        self.prepared.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn upload(
        &self,
        cancel: &CancellationToken,
        key: &str,
        payload: Payload,
    ) -> BackendResult<()> {
        self.wait(cancel).await?;

        if self.failing_uploads.contains(key) {
            return Err(BackendError::UnexpectedResponse(format!("{key} rejected")));
        }

        let mut uploaded = self.uploaded.lock().unwrap_or_else(PoisonError::into_inner);
        if self.upload_limit.is_some_and(|limit| uploaded.len() >= limit) {
            return Err(BackendError::UnexpectedResponse("quota exceeded".into()));
        }
        uploaded.push(key.to_owned());
        drop(uploaded);

        self.objects
            .lock()
            .unwrap()
            .insert(key.to_owned(), payload.len());
        Ok(())
    }

    async fn download(&self, cancel: &CancellationToken, key: &str) -> BackendResult<u64> {
        self.wait(cancel).await?;

        let size = self.objects.lock().unwrap().get(key).copied();
        let size = size.ok_or_else(|| BackendError::NotFound {
            key: key.to_owned(),
        })?;

        self.downloaded.lock().unwrap().push(key.to_owned());
        Ok(self.download_size.unwrap_or(size))
    }

    async fn delete(&self, cancel: &CancellationToken, key: &str) -> BackendResult<()> {
        self.wait(cancel).await?;

        if self.fail_deletes {
            return Err(BackendError::UnexpectedResponse(format!("{key} is locked")));
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Events reported to a [`RecordingObserver`].
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    LoopStarted(u32),
    PhaseStarted(u32, Phase),
    PhaseFinished(u32, PhaseStats),
    DeleteStarted(u32, usize),
    DeleteFinished(u32, DeleteStats),
    LoopFinished(u32),
    Paused(Pause),
}

/// Records all observer events except delete progress, which is only counted.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub events: Vec<Event>,
    pub delete_progress: usize,
}

impl RecordingObserver {
    pub fn phases_started(&self) -> Vec<Phase> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::PhaseStarted(_, phase) => Some(*phase),
                _ => None,
            })
            .collect()
    }

    pub fn pauses(&self) -> Vec<Pause> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Paused(pause) => Some(*pause),
                _ => None,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl RunObserver for RecordingObserver {
    fn loop_started(&mut self, loop_index: u32) {
        self.events.push(Event::LoopStarted(loop_index));
    }

    fn phase_started(&mut self, loop_index: u32, phase: Phase) {
        self.events.push(Event::PhaseStarted(loop_index, phase));
    }

    fn phase_finished(&mut self, loop_index: u32, stats: &PhaseStats) {
        self.events
            .push(Event::PhaseFinished(loop_index, stats.clone()));
    }

    fn delete_started(&mut self, loop_index: u32, objects: usize) {
        self.events.push(Event::DeleteStarted(loop_index, objects));
    }

    fn delete_progress(&mut self, _completed: usize, _total: usize) {
        self.delete_progress += 1;
    }

    fn delete_finished(&mut self, loop_index: u32, stats: &DeleteStats) {
        self.events
            .push(Event::DeleteFinished(loop_index, stats.clone()));
    }

    fn loop_finished(&mut self, summary: &LoopSummary) {
        self.events.push(Event::LoopFinished(summary.loop_index));
    }

    async fn pause(&mut self, pause: Pause) {
        self.events.push(Event::Paused(pause));
    }
}
