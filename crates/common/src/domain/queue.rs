use async_trait::async_trait;

use crate::domain::result::DomainResult;
use crate::domain::tap_event::TapEvent;

/// Trait for publishing batches of tap events to the broker
///
/// Implementations must:
/// - Append the whole batch atomically or fail without enqueuing any of it
/// - Serialize calls so at most one publish is in flight per publisher
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    async fn publish_batch(&self, batch: &[TapEvent]) -> DomainResult<()>;
}

/// Source of dequeue transactions against the broker
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DequeueBroker: Send + Sync {
    /// Open a transaction that holds every message it dequeues until commit or rollback
    async fn begin(&self) -> DomainResult<Box<dyn DequeueTransaction>>;
}

/// One broker transaction on the consuming side
///
/// Messages dequeued here are removed for good on `commit` and returned to the head of
/// the queue on `rollback`. A transaction dropped without either is rolled back.
/// Stored messages that cannot be decoded are never handed out; an implementation may
/// delete them even when the transaction is rolled back.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DequeueTransaction: Send {
    /// Take the next message, or `None` when the queue has nothing visible to this transaction
    async fn dequeue_one(&mut self) -> DomainResult<Option<TapEvent>>;

    async fn commit(self: Box<Self>) -> DomainResult<()>;

    async fn rollback(self: Box<Self>) -> DomainResult<()>;
}
