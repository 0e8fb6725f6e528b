use thiserror::Error;

use crate::backend::BackendError;

/// Errors for invalid run configurations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// At least one worker is required.
    #[error("the number of threads must be at least 1")]
    NoThreads,

    /// Objects must have contents.
    #[error("the object size must be greater than zero")]
    EmptyObjects,

    /// Multipart uploads need a non-empty part size.
    #[error("the multipart part size must be greater than zero")]
    EmptyParts,

    /// Multipart uploads need at least one part in flight.
    #[error("the multipart concurrency must be at least 1")]
    NoMultipartConcurrency,

    /// At least one loop is required.
    #[error("the number of loops must be at least 1")]
    NoLoops,

    /// Phases need a time budget.
    #[error("the phase duration must be greater than zero")]
    NoDuration,
}

/// Fatal conditions that abort a benchmark run.
#[derive(Debug, Error)]
pub enum RunError {
    /// The target container could not be prepared before any phase started.
    #[error("failed to prepare the storage container")]
    Prepare(#[source] BackendError),

    /// Too few uploads succeeded to run a meaningful download phase.
    #[error(
        "not enough successful uploads to continue in loop {loop_index}: \
         {successful} succeeded, at least {required} required"
    )]
    InsufficientUploads {
        /// The loop in which the upload phase ran, starting at 1.
        loop_index: u32,
        /// Number of successful uploads.
        successful: usize,
        /// The minimum number of successful uploads.
        required: usize,
    },

    /// Not a single download succeeded.
    #[error("all {failed} downloads failed in loop {loop_index}")]
    AllDownloadsFailed {
        /// The loop in which the download phase ran, starting at 1.
        loop_index: u32,
        /// Number of failed download attempts.
        failed: usize,
    },
}
