//! In-memory backend for dry runs and tests.
//!
//! This provides a [`Backend`] backed by a `HashMap`, with an optional artificial latency per
//! call. The backend is [`Clone`] so tests can hold a handle for direct inspection while the
//! engine owns a shared copy.
//!
//! Multipart uploads stage every part separately and only commit the assembled object once all
//! parts are staged, mirroring the visibility rules of real object stores.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::TryStreamExt;
use tokio_util::sync::CancellationToken;

use super::{Backend, BackendError, BackendResult, abort_unless_completed, until_cancelled};
use crate::multipart::MultipartConfig;
use crate::payload::Payload;

type Store = HashMap<String, Bytes>;
type Staging = HashMap<(String, usize), Bytes>;

/// A [`Backend`] keeping all objects in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    latency: Duration,
    multipart: Option<MultipartConfig>,
    store: Arc<Mutex<Store>>,
    staging: Arc<Mutex<Staging>>,
    parts_staged: Arc<AtomicUsize>,
}

impl InMemoryBackend {
    /// Creates an empty backend without latency.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every operation by the given latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Uploads objects in parts.
    pub fn with_multipart(mut self, multipart: Option<MultipartConfig>) -> Self {
        self.multipart = multipart;
        self
    }

    /// Returns a clone of the stored bytes, if present.
    pub fn get_stored(&self, key: &str) -> Option<Bytes> {
        self.store().get(key).cloned()
    }

    /// Returns `true` if the backend contains an object under the given key.
    pub fn contains(&self, key: &str) -> bool {
        self.store().contains_key(key)
    }

    /// Returns the number of committed objects.
    pub fn len(&self) -> usize {
        self.store().len()
    }

    /// Returns `true` if the backend has no committed objects.
    pub fn is_empty(&self) -> bool {
        self.store().is_empty()
    }

    /// Inserts an object directly, bypassing the `Backend` trait.
    pub fn insert(&self, key: impl Into<String>, contents: impl Into<Bytes>) {
        self.store().insert(key.into(), contents.into());
    }

    /// Total number of parts staged by multipart uploads so far.
    pub fn parts_staged(&self) -> usize {
        self.parts_staged.load(Ordering::Relaxed)
    }

    /// Number of parts staged but not yet committed into an object.
    pub fn pending_parts(&self) -> usize {
        self.staging().len()
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn staging(&self) -> MutexGuard<'_, Staging> {
        self.staging.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops the staged parts of an upload that did not commit.
    fn discard_parts(&self, key: &str) {
        self.staging().retain(|(staged, _), _| staged != key);
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        mut payload: Payload,
        multipart: MultipartConfig,
    ) -> BackendResult<()> {
        let parts = multipart.plan(payload.len());

        for (index, range) in parts.iter().enumerate() {
            let contents = payload.read_range(range.clone())?;
            self.simulate_latency().await;
            self.staging().insert((key.to_owned(), index), contents);
            self.parts_staged.fetch_add(1, Ordering::Relaxed);
        }

        let mut staging = self.staging();
        let mut object = BytesMut::with_capacity(payload.len() as usize);
        for index in 0..parts.len() {
            let part = staging
                .remove(&(key.to_owned(), index))
                .ok_or_else(|| BackendError::UnexpectedResponse(format!("part {index} missing")))?;
            object.extend_from_slice(&part);
        }
        drop(staging);

        self.store().insert(key.to_owned(), object.freeze());
        Ok(())
    }
}

#[async_trait::async_trait]
impl Backend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn prepare(&self) -> BackendResult<()> {
        Ok(())
    }

    async fn upload(
        &self,
        cancel: &CancellationToken,
        key: &str,
        payload: Payload,
    ) -> BackendResult<()> {
        if let Some(multipart) = self.multipart {
            let upload = self.upload_parts(key, payload, multipart);
            return abort_unless_completed(cancel, upload, || async { self.discard_parts(key) })
                .await;
        }

        until_cancelled(cancel, async {
            let contents: BytesMut = payload.into_stream().try_collect().await?;
            self.simulate_latency().await;
            self.store().insert(key.to_owned(), contents.freeze());
            Ok(())
        })
        .await
    }

    async fn download(&self, cancel: &CancellationToken, key: &str) -> BackendResult<u64> {
        until_cancelled(cancel, async {
            self.simulate_latency().await;
            let contents = self.get_stored(key).ok_or_else(|| BackendError::NotFound {
                key: key.to_owned(),
            })?;
            Ok(contents.len() as u64)
        })
        .await
    }

    async fn delete(&self, cancel: &CancellationToken, key: &str) -> BackendResult<()> {
        until_cancelled(cancel, async {
            self.simulate_latency().await;
            self.store().remove(key);
            Ok(())
        })
        .await
    }
}
