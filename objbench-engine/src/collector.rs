//! Collection of worker results within the time budget of a phase.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{Dispatcher, Feedback};
use crate::transfer::TransferResult;

/// Drains worker results until the phase budget has elapsed.
///
/// Every observed result is fed back into the [`Dispatcher`]: failures are retried with the same
/// identifier, successes are replaced by a fresh one. Once the deadline fires, collection stops
/// immediately and the phase token is cancelled. Results still in flight at that point are
/// abandoned.
#[derive(Debug)]
pub(crate) struct DeadlineCollector {
    budget: Duration,
}

impl DeadlineCollector {
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }

    /// Collects results in arrival order until the deadline.
    ///
    /// The dispatcher must already be seeded.
    pub async fn collect(
        &self,
        dispatcher: &mut Dispatcher,
        results: &mut mpsc::Receiver<TransferResult>,
        cancel: &CancellationToken,
    ) -> Vec<TransferResult> {
        let mut collected = Vec::new();

        // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
        let deadline = tokio::time::sleep(self.budget);
        tokio::pin!(deadline);

        loop {
            let result = tokio::select! {
                biased;
                () = &mut deadline => break,
                result = results.recv() => match result {
                    Some(result) => result,
                    None => {
                        tracing::warn!("all workers stopped before the deadline");
                        break;
                    }
                },
            };

            let feedback = Feedback::for_result(&result);
            collected.push(result);

            // pushing blocks while the queue is full, which must not delay the deadline
            let pushed = tokio::select! {
                biased;
                () = &mut deadline => break,
                pushed = dispatcher.apply(feedback) => pushed,
            };

            if let Err(error) = pushed {
                tracing::warn!(%error, "stopped collecting results");
                break;
            }
        }

        cancel.cancel();
        collected
    }
}
