//! The storage backend contract and its implementations.
//!
//! The benchmark engine never branches on the kind of storage it talks to. It only relies on the
//! four operations of [`Backend`]. Each implementation brings its own transport, authentication
//! and multipart logic.

use std::fmt::Debug;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::payload::Payload;

mod gcs;
mod in_memory;
mod local_fs;
mod s3;

pub use gcs::{Gcs, MAX_COMPOSE_PARTS};
pub use in_memory::InMemoryBackend;
pub use local_fs::LocalFs;
pub use s3::{S3Backend, S3Config};

/// User agent string used for outgoing requests.
pub const USER_AGENT: &str = concat!("objbench/", env!("CARGO_PKG_VERSION"));

/// A type-erased [`Backend`] shared between all workers of a phase.
pub type SharedBackend = Arc<dyn Backend>;

/// The operations the benchmark exercises against a storage service.
///
/// All transfer operations receive the cancellation token of the current phase. Implementations
/// must stop as soon as the token fires and return [`BackendError::Cancelled`].
#[async_trait::async_trait]
pub trait Backend: Debug + Send + Sync + 'static {
    /// The backend name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Establishes or verifies the destination container before the run starts.
    async fn prepare(&self) -> BackendResult<()>;

    /// Writes one object under the given key.
    async fn upload(
        &self,
        cancel: &CancellationToken,
        key: &str,
        payload: Payload,
    ) -> BackendResult<()>;

    /// Reads one object fully, discarding its contents, and returns the number of bytes received.
    async fn download(&self, cancel: &CancellationToken, key: &str) -> BackendResult<u64>;

    /// Deletes one object.
    async fn delete(&self, cancel: &CancellationToken, key: &str) -> BackendResult<()>;
}

/// Errors of a single backend operation.
#[derive(Debug, Error)]
pub enum BackendError {
    /// IO errors related to payload streaming or file operations.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from the reqwest client, either sending the request or returned by the API.
    #[error("reqwest error: {context}")]
    Reqwest {
        /// What was being attempted.
        context: String,
        /// The underlying client error.
        #[source]
        cause: reqwest::Error,
    },

    /// Errors encountered when attempting to authenticate with GCP.
    #[error("GCP authentication error: {0}")]
    GcpAuth(#[from] gcp_auth::Error),

    /// The downloaded byte count does not match the configured object size.
    #[error("wrong response size: expected {expected} bytes, received {actual}")]
    WrongResponseSize {
        /// The configured object size.
        expected: u64,
        /// The number of bytes received.
        actual: u64,
    },

    /// The requested object does not exist.
    #[error("object `{key}` not found")]
    NotFound {
        /// The storage key of the object.
        key: String,
    },

    /// The operation was aborted because its phase ended.
    #[error("operation cancelled")]
    Cancelled,

    /// The backend answered with something it should not have.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Any other error stemming from one of the storage backends.
    #[error("storage backend error: {context}")]
    Generic {
        /// What was being attempted.
        context: String,
        /// The underlying error.
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl BackendError {
    /// Returns `true` if the error was caused by the phase deadline.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub(crate) fn reqwest(context: impl Into<String>) -> impl FnOnce(reqwest::Error) -> Self {
        let context = context.into();
        move |cause| Self::Reqwest { context, cause }
    }

    pub(crate) fn generic<E>(context: impl Into<String>) -> impl FnOnce(E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let context = context.into();
        move |cause| Self::Generic {
            context,
            cause: Box::new(cause),
        }
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Runs a backend operation until it completes or the phase is cancelled.
pub(crate) async fn until_cancelled<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = BackendResult<T>>,
) -> BackendResult<T> {
    cancel
        .run_until_cancelled(operation)
        .await
        .unwrap_or(Err(BackendError::Cancelled))
}

/// Fails with [`BackendError::Cancelled`] once the phase has been cancelled.
pub(crate) fn ensure_active(cancel: &CancellationToken) -> BackendResult<()> {
    if cancel.is_cancelled() {
        return Err(BackendError::Cancelled);
    }
    Ok(())
}

/// Runs a multipart upload until it completes or the phase is cancelled.
///
/// If the upload fails or is cancelled, `abort` runs to completion before the error is returned.
/// It must release everything staged so far, since the phase token has possibly fired already.
pub(crate) async fn abort_unless_completed<T, A>(
    cancel: &CancellationToken,
    operation: impl Future<Output = BackendResult<T>>,
    abort: impl FnOnce() -> A,
) -> BackendResult<T>
where
    A: Future<Output = ()>,
{
    let result = until_cancelled(cancel, operation).await;
    if result.is_err() {
        abort().await;
    }
    result
}
