//! Aggregated statistics of phases, loops and whole runs.

use std::time::Duration;

use crate::id::WorkItem;
use crate::transfer::{Phase, TransferResult};

/// Aggregated outcome of one timed phase.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseStats {
    /// The phase these statistics describe.
    pub phase: Phase,
    /// The number of workers that ran the phase.
    pub threads: usize,
    /// The size of every object in bytes.
    pub object_size: u64,
    /// The number of successful attempts.
    pub successful: usize,
    /// The number of failed attempts, including cancelled ones.
    pub failed: usize,
    /// Bytes transferred by successful attempts.
    pub total_bytes: u64,
    /// Wall-clock time of the whole phase.
    pub elapsed: Duration,
    durations: Vec<Duration>,
}

impl PhaseStats {
    /// Aggregates the results collected in a phase.
    ///
    /// `elapsed` is the wall-clock time of the whole collection, not the sum of individual
    /// attempts.
    pub fn from_results(
        phase: Phase,
        results: &[TransferResult],
        object_size: u64,
        threads: usize,
        elapsed: Duration,
    ) -> Self {
        let mut durations: Vec<_> = results
            .iter()
            .filter(|result| result.is_success())
            .map(|result| result.duration)
            .collect();
        durations.sort_unstable();

        let successful = durations.len();
        Self {
            phase,
            threads,
            object_size,
            successful,
            failed: results.len() - successful,
            total_bytes: successful as u64 * object_size,
            elapsed,
            durations,
        }
    }

    /// The total number of attempts observed.
    pub fn attempts(&self) -> usize {
        self.successful + self.failed
    }

    /// Throughput in decimal megabytes per second.
    pub fn throughput_mbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / secs / 1_000_000.0
    }

    /// Durations of successful attempts in ascending order.
    pub fn durations(&self) -> &[Duration] {
        &self.durations
    }

    /// The duration below which the given fraction of successful attempts completed.
    ///
    /// Returns `None` without successful attempts.
    pub fn percentile(&self, quantile: f64) -> Option<Duration> {
        let last = self.durations.len().checked_sub(1)?;
        let index = (quantile.clamp(0.0, 1.0) * last as f64).round() as usize;
        self.durations.get(index).copied()
    }
}

/// Extracts the identifiers of successful attempts in arrival order.
pub fn successful_ids(results: &[TransferResult]) -> Vec<WorkItem> {
    results
        .iter()
        .filter(|result| result.is_success())
        .map(|result| result.id)
        .collect()
}

/// Outcome of the sequential cleanup at the end of a loop.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeleteStats {
    /// The number of objects a deletion was attempted for.
    pub attempted: usize,
    /// The number of deletions that failed.
    pub failed: usize,
    /// Wall-clock time of the cleanup.
    pub elapsed: Duration,
}

impl DeleteStats {
    /// The number of successful deletions.
    pub fn deleted(&self) -> usize {
        self.attempted - self.failed
    }
}

/// Statistics of one upload, download and delete cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct LoopSummary {
    /// The loop number, starting at 1.
    pub loop_index: u32,
    /// Statistics of the upload phase.
    pub upload: PhaseStats,
    /// Statistics of the download phase.
    pub download: PhaseStats,
    /// Statistics of the cleanup.
    pub delete: DeleteStats,
}

/// Statistics of all loops of a run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    /// Completed loops in order.
    pub loops: Vec<LoopSummary>,
}

impl RunSummary {
    /// Bytes transferred by all successful uploads and downloads.
    pub fn total_bytes(&self) -> u64 {
        self.loops
            .iter()
            .map(|summary| summary.upload.total_bytes + summary.download.total_bytes)
            .sum()
    }
}
