//! Splitting objects into multipart upload parts.

use std::ops::Range;

/// Default number of parts uploaded concurrently within a single multipart upload.
pub const DEFAULT_MULTIPART_CONCURRENCY: usize = 5;

/// Settings for backends that upload objects in parts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MultipartConfig {
    /// Size of every part except possibly the last one.
    pub part_size: u64,
    /// Maximum number of parts in flight for one object.
    pub concurrency: usize,
}

impl MultipartConfig {
    /// Plans the parts for an object of the given size.
    pub fn plan(&self, object_size: u64) -> Vec<Range<u64>> {
        plan_parts(object_size, self.part_size)
    }
}

/// Returns the contiguous byte ranges of all parts of an object.
///
/// All parts are `part_size` bytes long, except for the last which holds the remainder. The sum of
/// all part lengths always equals `object_size`.
pub fn plan_parts(object_size: u64, part_size: u64) -> Vec<Range<u64>> {
    let part_size = part_size.max(1);
    (0..object_size)
        .step_by(part_size as usize)
        .map(|start| start..(start + part_size).min(object_size))
        .collect()
}
