//! The bounded queue of pending work items.
//!
//! The [`Dispatcher`] is the only throttle in a phase: its queue holds at most `threads + 1`
//! identifiers and every identifier taken from it is only replaced once its result has been
//! observed. Failed identifiers are offered again unchanged, while successes are replaced by a
//! fresh, never-used identifier.

use thiserror::Error;

use crate::id::WorkItem;
use crate::transfer::TransferResult;

/// The receiving end of the work queue, shared by all workers of a phase.
pub type WorkQueue = async_channel::Receiver<WorkItem>;

/// Error returned when no worker is left to receive work items.
#[derive(Debug, Error)]
#[error("the work queue is closed")]
pub struct QueueClosed;

/// How the dispatcher reacts to an observed result.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Feedback {
    /// Offer the same identifier again.
    Retry(WorkItem),
    /// Offer the next unused identifier.
    Advance,
}

impl Feedback {
    /// Determines the feedback for a result.
    pub fn for_result(result: &TransferResult) -> Self {
        match result.error {
            Some(_) => Self::Retry(result.id),
            None => Self::Advance,
        }
    }
}

/// Hands out work item identifiers to the workers of a phase.
#[derive(Debug)]
pub struct Dispatcher {
    queue: async_channel::Sender<WorkItem>,
    next: WorkItem,
}

impl Dispatcher {
    /// Creates a dispatcher for `threads` workers along with the queue they pull from.
    pub fn new(threads: usize) -> (Self, WorkQueue) {
        let (queue, receiver) = async_channel::bounded(threads + 1);
        let dispatcher = Self {
            queue,
            next: WorkItem::default(),
        };
        (dispatcher, receiver)
    }

    /// The maximum number of identifiers waiting in the queue.
    pub fn capacity(&self) -> usize {
        self.queue.capacity().unwrap_or(usize::MAX)
    }

    /// The number of identifiers currently waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// The next identifier that has never been handed out.
    pub fn next_id(&self) -> WorkItem {
        self.next
    }

    /// Fills the empty queue with sequential identifiers up to its capacity.
    pub fn seed(&mut self) -> Result<(), QueueClosed> {
        while !self.queue.is_full() {
            let item = self.allocate();
            self.queue.try_send(item).map_err(|_| QueueClosed)?;
        }
        Ok(())
    }

    /// Offers a failed identifier again.
    ///
    /// Waits while the queue is full.
    pub async fn requeue(&self, item: WorkItem) -> Result<(), QueueClosed> {
        self.queue.send(item).await.map_err(|_| QueueClosed)
    }

    /// Offers the next never-used identifier and returns it.
    ///
    /// Waits while the queue is full.
    pub async fn advance(&mut self) -> Result<WorkItem, QueueClosed> {
        let item = self.allocate();
        self.queue.send(item).await.map_err(|_| QueueClosed)?;
        Ok(item)
    }

    /// Applies the feedback for an observed result.
    pub async fn apply(&mut self, feedback: Feedback) -> Result<WorkItem, QueueClosed> {
        match feedback {
            Feedback::Retry(item) => self.requeue(item).await.map(|()| item),
            Feedback::Advance => self.advance().await,
        }
    }

    fn allocate(&mut self) -> WorkItem {
        let item = self.next;
        self.next = item.next();
        item
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::BackendError;

    fn drain(queue: &WorkQueue) -> Vec<u64> {
        std::iter::from_fn(|| queue.try_recv().ok())
            .map(WorkItem::get)
            .collect()
    }

    #[test]
    fn seeds_threads_plus_one() {
        let (mut dispatcher, queue) = Dispatcher::new(4);
        dispatcher.seed().unwrap();

        assert_eq!(dispatcher.capacity(), 5);
        assert_eq!(dispatcher.queued(), 5);
        assert_eq!(drain(&queue), vec![0, 1, 2, 3, 4]);
        assert_eq!(dispatcher.next_id(), WorkItem::new(5));
    }

    #[tokio::test]
    async fn retry_reuses_and_advance_allocates() {
        let (mut dispatcher, queue) = Dispatcher::new(2);
        dispatcher.seed().unwrap();
        assert_eq!(drain(&queue), vec![0, 1, 2]);

        let failed = TransferResult {
            id: WorkItem::new(1),
            duration: Duration::from_millis(3),
            error: Some(BackendError::Cancelled),
        };
        let feedback = Feedback::for_result(&failed);
        assert_eq!(feedback, Feedback::Retry(WorkItem::new(1)));
        dispatcher.apply(feedback).await.unwrap();

        let succeeded = TransferResult {
            id: WorkItem::new(1),
            duration: Duration::from_millis(3),
            error: None,
        };
        let feedback = Feedback::for_result(&succeeded);
        assert_eq!(feedback, Feedback::Advance);
        assert_eq!(dispatcher.apply(feedback).await.unwrap(), WorkItem::new(3));
        assert_eq!(dispatcher.advance().await.unwrap(), WorkItem::new(4));

        assert_eq!(drain(&queue), vec![1, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_applies_backpressure() {
        let (mut dispatcher, queue) = Dispatcher::new(1);
        dispatcher.seed().unwrap();

        let blocked = tokio::time::timeout(Duration::from_secs(1), dispatcher.advance()).await;
        assert!(blocked.is_err(), "pushing into a full queue must wait");

        queue.recv().await.unwrap();
        dispatcher.advance().await.unwrap();
        assert_eq!(dispatcher.queued(), 2);
    }

    #[tokio::test]
    async fn closed_queue() {
        let (mut dispatcher, queue) = Dispatcher::new(1);
        drop(queue);

        assert!(dispatcher.seed().is_err());
        assert!(dispatcher.requeue(WorkItem::new(0)).await.is_err());
    }
}
