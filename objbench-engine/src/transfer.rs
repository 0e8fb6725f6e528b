//! Phases and the per-attempt outcome reported by workers.

use std::fmt;
use std::time::Duration;

use crate::backend::BackendError;
use crate::id::WorkItem;

/// A bounded span of time during which one operation type is exercised.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Phase {
    /// Objects are written.
    Upload,
    /// Previously uploaded objects are read back.
    Download,
    /// Uploaded objects are removed again.
    Delete,
}

impl Phase {
    /// The HTTP-style verb used in reports.
    pub fn operation(self) -> &'static str {
        match self {
            Self::Upload => "PUT",
            Self::Download => "GET",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Upload => "upload",
            Self::Download => "download",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// The outcome of a single backend call.
///
/// Every attempt produces exactly one result, so a retried identifier shows up once per attempt.
#[derive(Debug)]
pub struct TransferResult {
    /// The work item the attempt was made for.
    pub id: WorkItem,
    /// Wall-clock time spent in the backend call.
    pub duration: Duration,
    /// The failure cause, if the attempt did not succeed.
    pub error: Option<BackendError>,
}

impl TransferResult {
    /// Returns `true` if the attempt succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
