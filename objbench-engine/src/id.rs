//! Identifiers for benchmark objects.

use std::fmt;

/// Integer token identifying one logical object transfer.
///
/// Upload identifiers are allocated sequentially starting at `0`. Download identifiers index into
/// the list of successfully uploaded identifiers. The storage key of the object is derived with
/// [`object_key`].
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct WorkItem(u64);

impl WorkItem {
    /// Creates a work item from its raw value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the identifier following this one.
    pub(crate) const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u64> for WorkItem {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derives the storage key `<prefix>-<id>` of an object.
pub fn object_key(prefix: &str, item: WorkItem) -> String {
    format!("{prefix}-{item}")
}
