//! A single timed phase of a benchmark loop.
//!
//! Each phase owns its work queue, results channel and cancellation token. Workers pull
//! identifiers from the queue while the collector gathers results until the time budget runs out,
//! at which point all in-flight transfers are cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backend::SharedBackend;
use crate::collector::DeadlineCollector;
use crate::config::RunConfig;
use crate::dispatcher::{Dispatcher, WorkQueue};
use crate::transfer::{Phase, TransferResult};
use crate::worker::{Operation, WorkerContext, WorkerPool};

/// The raw outcome of one timed phase.
#[derive(Debug)]
pub(crate) struct PhaseOutcome {
    pub phase: Phase,
    pub results: Vec<TransferResult>,
    pub elapsed: Duration,
}

/// The queues connecting the dispatcher, the workers and the collector of a phase.
struct PhaseChannels {
    dispatcher: Dispatcher,
    queue: WorkQueue,
    results: mpsc::Sender<TransferResult>,
    receiver: mpsc::Receiver<TransferResult>,
}

impl PhaseChannels {
    fn new(threads: usize) -> Self {
        let (dispatcher, queue) = Dispatcher::new(threads);
        let (results, receiver) = mpsc::channel(threads);
        Self {
            dispatcher,
            queue,
            results,
            receiver,
        }
    }
}

/// Runs one timed phase with a fresh dispatcher, worker pool and cancellation token.
pub(crate) async fn run_phase(
    config: &RunConfig,
    backend: &SharedBackend,
    operation: Operation,
) -> PhaseOutcome {
    let channels = PhaseChannels::new(config.threads());
    execute_phase(config, backend, operation, channels).await
}

async fn execute_phase(
    config: &RunConfig,
    backend: &SharedBackend,
    operation: Operation,
    channels: PhaseChannels,
) -> PhaseOutcome {
    let phase = operation.phase();
    let threads = config.threads();
    let cancel = CancellationToken::new();

    let PhaseChannels {
        mut dispatcher,
        queue,
        results,
        mut receiver,
    } = channels;

    if let Err(error) = dispatcher.seed() {
        tracing::error!(%phase, %error, "failed to seed the work queue");
        return PhaseOutcome {
            phase,
            results: Vec::new(),
            elapsed: Duration::ZERO,
        };
    }

    let context = Arc::new(WorkerContext {
        backend: Arc::clone(backend),
        prefix: config.prefix().to_owned(),
        operation,
        cancel: cancel.clone(),
    });
    WorkerPool::new(threads).spawn(context, queue, results);

    tracing::debug!(%phase, threads, budget = ?config.duration(), "phase started");

    let start = Instant::now();
    let results = DeadlineCollector::new(config.duration())
        .collect(&mut dispatcher, &mut receiver, &cancel)
        .await;
    let elapsed = start.elapsed();

    tracing::debug!(%phase, results = results.len(), ?elapsed, "phase finished");

    PhaseOutcome {
        phase,
        results,
        elapsed,
    }
}
