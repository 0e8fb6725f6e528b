//! Progress reporting hooks of a benchmark run.

use crate::stats::{DeleteStats, LoopSummary, PhaseStats};
use crate::transfer::Phase;

/// A point at which the run waits for manual confirmation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Pause {
    /// After the upload phase, before downloads start.
    BeforeDownload,
    /// After the download phase, before uploaded objects are deleted.
    BeforeDelete,
    /// Before a new loop starts.
    BetweenLoops {
        /// The number of the loop that just completed.
        completed: u32,
    },
}

/// Receives progress events from the [`Orchestrator`](crate::Orchestrator).
///
/// All methods default to doing nothing.
#[async_trait::async_trait]
pub trait RunObserver: Send {
    /// A new loop starts.
    fn loop_started(&mut self, _loop_index: u32) {}

    /// A timed phase starts.
    fn phase_started(&mut self, _loop_index: u32, _phase: Phase) {}

    /// A timed phase completed.
    fn phase_finished(&mut self, _loop_index: u32, _stats: &PhaseStats) {}

    /// Deletion of uploaded objects starts.
    fn delete_started(&mut self, _loop_index: u32, _objects: usize) {}

    /// Another object has been deleted, successfully or not.
    fn delete_progress(&mut self, _completed: usize, _total: usize) {}

    /// All objects of the loop have been processed.
    fn delete_finished(&mut self, _loop_index: u32, _stats: &DeleteStats) {}

    /// A loop has completed.
    fn loop_finished(&mut self, _summary: &LoopSummary) {}

    /// Waits for confirmation before the run continues.
    ///
    /// Only called if pauses are enabled in the configuration.
    async fn pause(&mut self, _pause: Pause) {}
}

/// An observer ignoring all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}
