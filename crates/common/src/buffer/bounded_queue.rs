use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;

/// Capacity used when none is configured
pub const DEFAULT_QUEUE_CAPACITY: usize = 100_000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EnqueueError<T> {
    #[error("queue is full")]
    Full(T),

    #[error("enqueue cancelled")]
    Cancelled(T),

    #[error("queue consumer is gone")]
    Closed(T),
}

impl<T> EnqueueError<T> {
    pub fn into_inner(self) -> T {
        match self {
            EnqueueError::Full(item) | EnqueueError::Cancelled(item) | EnqueueError::Closed(item) => {
                item
            }
        }
    }
}

/// Result of waiting for the queue to have data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    Cancelled,
    Closed,
}

/// Multi-producer, single-consumer queue that never drops items
///
/// A full queue makes `enqueue` wait for room, which pushes backpressure out to ingress.
/// Every queued item holds one of `capacity` slots until `drain_into` hands it out,
/// including the item `wait_for_data` has already taken off the channel.
pub fn bounded_queue<T>(capacity: usize) -> (QueueProducer<T>, QueueReceiver<T>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let slots = Arc::new(Semaphore::new(capacity));
    (
        QueueProducer {
            sender,
            slots: slots.clone(),
            capacity,
        },
        QueueReceiver {
            receiver,
            slots,
            pending: None,
        },
    )
}

pub struct QueueProducer<T> {
    sender: mpsc::UnboundedSender<T>,
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl<T> Clone for QueueProducer<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            slots: self.slots.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> QueueProducer<T> {
    pub fn try_enqueue(&self, item: T) -> Result<(), EnqueueError<T>> {
        match self.slots.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(TryAcquireError::NoPermits) => return Err(EnqueueError::Full(item)),
            Err(TryAcquireError::Closed) => return Err(EnqueueError::Closed(item)),
        }
        self.send(item)
    }

    /// Enqueue, waiting for room until `ctx` is cancelled
    ///
    /// A cancelled wait hands the item back without enqueuing it.
    pub async fn enqueue(&self, item: T, ctx: &CancellationToken) -> Result<(), EnqueueError<T>> {
        if ctx.is_cancelled() {
            return Err(EnqueueError::Cancelled(item));
        }
        let item = match self.try_enqueue(item) {
            Ok(()) => return Ok(()),
            Err(EnqueueError::Full(item)) => item,
            Err(other) => return Err(other),
        };

        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(EnqueueError::Cancelled(item)),
            permit = self.slots.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    self.send(item)
                }
                Err(_) => Err(EnqueueError::Closed(item)),
            },
        }
    }

    /// Items currently holding a slot
    pub fn len(&self) -> usize {
        self.capacity.saturating_sub(self.slots.available_permits())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // The caller already holds a slot for `item`.
    fn send(&self, item: T) -> Result<(), EnqueueError<T>> {
        self.sender
            .send(item)
            .map_err(|mpsc::error::SendError(item)| EnqueueError::Closed(item))
    }
}

/// The single consuming end of a `bounded_queue`
pub struct QueueReceiver<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    slots: Arc<Semaphore>,
    pending: Option<T>,
}

impl<T> QueueReceiver<T> {
    /// Suspend until at least one item can be drained or `ctx` is cancelled
    ///
    /// Cancellation wins when both are ready.
    pub async fn wait_for_data(&mut self, ctx: &CancellationToken) -> WaitOutcome {
        if self.pending.is_some() {
            return WaitOutcome::Ready;
        }
        tokio::select! {
            biased;
            _ = ctx.cancelled() => WaitOutcome::Cancelled,
            item = self.receiver.recv() => match item {
                Some(item) => {
                    self.pending = Some(item);
                    WaitOutcome::Ready
                }
                None => WaitOutcome::Closed,
            },
        }
    }

    /// Move up to `max` items into `buffer` without waiting, returning how many were moved
    pub fn drain_into(&mut self, buffer: &mut Vec<T>, max: usize) -> usize {
        let mut moved = 0;
        if max > 0 {
            if let Some(item) = self.pending.take() {
                buffer.push(item);
                moved += 1;
            }
        }
        while moved < max {
            match self.receiver.try_recv() {
                Ok(item) => {
                    buffer.push(item);
                    moved += 1;
                }
                Err(_) => break,
            }
        }
        self.slots.add_permits(moved);
        moved
    }

    /// Close the queue to producers and drop whatever is still in it
    pub fn close_and_discard(&mut self) -> usize {
        self.slots.close();
        self.receiver.close();
        let mut discarded = usize::from(self.pending.take().is_some());
        while self.receiver.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }
}

impl<T> Drop for QueueReceiver<T> {
    fn drop(&mut self) {
        // Wakes producers still waiting for a slot.
        self.slots.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_try_enqueue_fails_when_full() {
        let (producer, _receiver) = bounded_queue(2);
        producer.try_enqueue(1).unwrap();
        producer.try_enqueue(2).unwrap();
        assert_eq!(producer.try_enqueue(3), Err(EnqueueError::Full(3)));
        assert_eq!(producer.len(), 2);
    }

    #[tokio::test]
    async fn test_item_taken_by_wait_still_counts_against_capacity() {
        let (producer, mut receiver) = bounded_queue(2);
        producer.try_enqueue(1).unwrap();
        producer.try_enqueue(2).unwrap();
        let ctx = CancellationToken::new();
        assert_eq!(receiver.wait_for_data(&ctx).await, WaitOutcome::Ready);

        assert_eq!(producer.try_enqueue(3), Err(EnqueueError::Full(3)));
        assert_eq!(producer.len(), 2);

        let mut batch = Vec::new();
        assert_eq!(receiver.drain_into(&mut batch, 10), 2);
        assert_eq!(batch, vec![1, 2]);
        assert!(producer.is_empty());
        producer.try_enqueue(3).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_receiver_releases_waiting_producer() {
        let (producer, receiver) = bounded_queue(1);
        let ctx = CancellationToken::new();
        producer.try_enqueue(1).unwrap();

        let waiting = {
            let producer = producer.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { producer.enqueue(2, &ctx).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(receiver);

        assert_eq!(waiting.await.unwrap(), Err(EnqueueError::Closed(2)));
    }

    #[tokio::test]
    async fn test_drain_respects_max_and_order() {
        let (producer, mut receiver) = bounded_queue(16);
        for i in 0..10 {
            producer.try_enqueue(i).unwrap();
        }
        let ctx = CancellationToken::new();
        assert_eq!(receiver.wait_for_data(&ctx).await, WaitOutcome::Ready);

        let mut batch = Vec::new();
        assert_eq!(receiver.drain_into(&mut batch, 4), 4);
        assert_eq!(batch, vec![0, 1, 2, 3]);

        batch.clear();
        assert_eq!(receiver.drain_into(&mut batch, 100), 6);
        assert_eq!(batch, vec![4, 5, 6, 7, 8, 9]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_waits_for_room() {
        let (producer, mut receiver) = bounded_queue(1);
        let ctx = CancellationToken::new();
        producer.try_enqueue("first").unwrap();

        let waiting = {
            let producer = producer.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { producer.enqueue("second", &ctx).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        let mut batch = Vec::new();
        receiver.wait_for_data(&ctx).await;
        receiver.drain_into(&mut batch, 1);
        waiting.await.unwrap().unwrap();

        receiver.wait_for_data(&ctx).await;
        receiver.drain_into(&mut batch, 1);
        assert_eq!(batch, vec!["first", "second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_enqueue_returns_item() {
        let (producer, _receiver) = bounded_queue(1);
        let ctx = CancellationToken::new();
        producer.try_enqueue(1).unwrap();

        let waiting = {
            let producer = producer.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { producer.enqueue(2, &ctx).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        ctx.cancel();

        assert_eq!(waiting.await.unwrap(), Err(EnqueueError::Cancelled(2)));
        assert_eq!(producer.len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_after_cancel_fails_fast() {
        let (producer, _receiver) = bounded_queue(8);
        let ctx = CancellationToken::new();
        ctx.cancel();
        assert_eq!(
            producer.enqueue(1, &ctx).await,
            Err(EnqueueError::Cancelled(1))
        );
        assert!(producer.is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_data_observes_cancellation() {
        let (_producer, mut receiver) = bounded_queue::<u8>(8);
        let ctx = CancellationToken::new();
        ctx.cancel();
        assert_eq!(receiver.wait_for_data(&ctx).await, WaitOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_wait_for_data_reports_closed_queue() {
        let (producer, mut receiver) = bounded_queue::<u8>(8);
        drop(producer);
        let ctx = CancellationToken::new();
        assert_eq!(receiver.wait_for_data(&ctx).await, WaitOutcome::Closed);
    }

    #[tokio::test]
    async fn test_close_and_discard_counts_leftovers() {
        let (producer, mut receiver) = bounded_queue(8);
        for i in 0..5 {
            producer.try_enqueue(i).unwrap();
        }
        assert_eq!(receiver.close_and_discard(), 5);
        assert_eq!(producer.try_enqueue(9), Err(EnqueueError::Closed(9)));
    }
}
