use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use async_trait::async_trait;
use tracing::debug;

use crate::domain::{
    DequeueBroker, DequeueTransaction, DomainError, DomainResult, QueuePublisher, TapEvent,
};

#[derive(Debug, Default)]
struct BrokerState {
    queue: Mutex<VecDeque<TapEvent>>,
    publish_lock: tokio::sync::Mutex<()>,
    fail_publishes: AtomicUsize,
    fail_dequeues: AtomicUsize,
    transactions_begun: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl BrokerState {
    fn queue(&self) -> MutexGuard<'_, VecDeque<TapEvent>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Process-local broker implementing both the publishing and the consuming side
///
/// Used by the all-in-one binary when no database is configured and by tests.
/// Clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages waiting to be dequeued
    pub fn len(&self) -> usize {
        self.state.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the next `count` publish calls fail without enqueuing anything
    pub fn fail_next_publishes(&self, count: usize) {
        self.state.fail_publishes.store(count, Ordering::Release);
    }

    /// Make the next `count` dequeue calls fail
    pub fn fail_next_dequeues(&self, count: usize) {
        self.state.fail_dequeues.store(count, Ordering::Release);
    }

    pub fn transactions_begun(&self) -> u64 {
        self.state.transactions_begun.load(Ordering::Relaxed)
    }

    pub fn commits(&self) -> u64 {
        self.state.commits.load(Ordering::Relaxed)
    }

    pub fn rollbacks(&self) -> u64 {
        self.state.rollbacks.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl QueuePublisher for InMemoryBroker {
    async fn publish_batch(&self, batch: &[TapEvent]) -> DomainResult<()> {
        let _guard = self.state.publish_lock.lock().await;
        if BrokerState::take_failure(&self.state.fail_publishes) {
            return Err(DomainError::PublishFailed {
                count: batch.len(),
                source: anyhow!("injected publish failure"),
            });
        }
        self.state.queue().extend(batch.iter().cloned());
        debug!(count = batch.len(), "published batch to in-memory broker");
        Ok(())
    }
}

#[async_trait]
impl DequeueBroker for InMemoryBroker {
    async fn begin(&self) -> DomainResult<Box<dyn DequeueTransaction>> {
        self.state.transactions_begun.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(InMemoryTransaction {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
            finished: false,
        }))
    }
}

struct InMemoryTransaction {
    state: Arc<BrokerState>,
    staged: Vec<TapEvent>,
    finished: bool,
}

impl InMemoryTransaction {
    fn restore(&mut self) {
        let mut queue = self.state.queue();
        for event in self.staged.drain(..).rev() {
            queue.push_front(event);
        }
        self.finished = true;
        self.state.rollbacks.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl DequeueTransaction for InMemoryTransaction {
    async fn dequeue_one(&mut self) -> DomainResult<Option<TapEvent>> {
        if BrokerState::take_failure(&self.state.fail_dequeues) {
            return Err(DomainError::DequeueFailed(anyhow!(
                "injected dequeue failure"
            )));
        }
        let next = self.state.queue().pop_front();
        Ok(next.map(|event| {
            self.staged.push(event.clone());
            event
        }))
    }

    async fn commit(mut self: Box<Self>) -> DomainResult<()> {
        self.staged.clear();
        self.finished = true;
        self.state.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> DomainResult<()> {
        self.restore();
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.restore();
        }
    }
}
