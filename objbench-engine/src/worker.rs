//! The pool of workers executing backend operations.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendError, BackendResult, SharedBackend};
use crate::dispatcher::WorkQueue;
use crate::id::{WorkItem, object_key};
use crate::payload::PayloadSource;
use crate::transfer::{Phase, TransferResult};

/// The backend operation workers apply to every work item of a phase.
#[derive(Debug)]
pub(crate) enum Operation {
    /// Upload a fresh copy of the payload under the key of the work item.
    Upload { payload: PayloadSource },
    /// Download one of the uploaded objects, selected by the work item modulo their count.
    Download {
        targets: Arc<[WorkItem]>,
        object_size: u64,
    },
}

impl Operation {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Upload { .. } => Phase::Upload,
            Self::Download { .. } => Phase::Download,
        }
    }
}

/// Maps a download work item onto one of the successfully uploaded objects.
///
/// Returns `None` if there are no targets.
pub(crate) fn download_target(targets: &[WorkItem], item: WorkItem) -> Option<WorkItem> {
    let index = item.get().checked_rem(targets.len() as u64)?;
    targets.get(index as usize).copied()
}

/// Everything a worker needs to execute work items, shared read-only by the pool.
#[derive(Debug)]
pub(crate) struct WorkerContext {
    pub backend: SharedBackend,
    pub prefix: String,
    pub operation: Operation,
    pub cancel: CancellationToken,
}

impl WorkerContext {
    async fn execute(&self, item: WorkItem) -> BackendResult<()> {
        match &self.operation {
            Operation::Upload { payload } => {
                let key = object_key(&self.prefix, item);
                self.backend.upload(&self.cancel, &key, payload.open()).await
            }
            Operation::Download {
                targets,
                object_size,
            } => {
                let target = download_target(targets, item).ok_or_else(|| {
                    BackendError::UnexpectedResponse("no uploaded objects to download".into())
                })?;
                let key = object_key(&self.prefix, target);

                let received = self.backend.download(&self.cancel, &key).await?;
                if received != *object_size {
                    return Err(BackendError::WrongResponseSize {
                        expected: *object_size,
                        actual: received,
                    });
                }
                Ok(())
            }
        }
    }
}

/// A fixed number of workers started fresh for every phase.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self { workers }
    }

    /// Spawns all workers.
    ///
    /// Workers are not joined. They stop on their own once the dispatcher or the result receiver
    /// has been dropped at the end of the phase.
    pub fn spawn(
        &self,
        context: Arc<WorkerContext>,
        queue: WorkQueue,
        results: mpsc::Sender<TransferResult>,
    ) {
        for worker in 0..self.workers {
            tokio::spawn(run_worker(
                worker,
                Arc::clone(&context),
                queue.clone(),
                results.clone(),
            ));
        }
    }
}

async fn run_worker(
    worker: usize,
    context: Arc<WorkerContext>,
    queue: WorkQueue,
    results: mpsc::Sender<TransferResult>,
) {
    let phase = context.operation.phase();

    while let Ok(id) = queue.recv().await {
        let start = Instant::now();
        let outcome = context.execute(id).await;
        let result = TransferResult {
            id,
            duration: start.elapsed(),
            error: outcome.err(),
        };

        match &result.error {
            Some(error) if error.is_cancelled() => {
                tracing::trace!(worker, %phase, %id, "transfer cancelled at the deadline");
            }
            Some(error) => {
                tracing::debug!(
                    worker,
                    %phase,
                    %id,
                    error = error as &dyn std::error::Error,
                    "transfer failed"
                );
            }
            None => {}
        }

        if results.send(result).await.is_err() {
            break;
        }
    }

    tracing::trace!(worker, %phase, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_targets_wrap_around() {
        let targets = [3, 5, 8, 13, 21].map(WorkItem::new);

        let mapped: Vec<_> = (0..12)
            .map(|k| download_target(&targets, WorkItem::new(k)).unwrap().get())
            .collect();
        assert_eq!(mapped, vec![3, 5, 8, 13, 21, 3, 5, 8, 13, 21, 3, 5]);

        assert_eq!(download_target(&[], WorkItem::new(7)), None);
    }
}
