use std::sync::Arc;
use std::time::Duration;

use common::{DequeueBroker, DomainResult, FaultKind, FaultReporter, PipelineFault, TapEvent};
use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const COMPONENT: &str = "queue_consumer";

#[derive(Debug, Clone)]
pub struct QueueConsumerConfig {
    pub batch_size: usize,
    /// Wait after a poll that found nothing
    pub poll_delay: Duration,
    /// Wait after a broker or connection fault
    pub fault_backoff: Duration,
}

impl Default for QueueConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            poll_delay: Duration::from_millis(100),
            fault_backoff: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Batch(Vec<TapEvent>),
    Empty,
}

/// Polls the broker and turns committed transactions into batches
pub struct QueueConsumer {
    broker: Arc<dyn DequeueBroker>,
    config: QueueConsumerConfig,
    faults: FaultReporter,
}

impl QueueConsumer {
    pub fn new(
        broker: Arc<dyn DequeueBroker>,
        config: QueueConsumerConfig,
        faults: FaultReporter,
    ) -> Self {
        Self {
            broker,
            config,
            faults,
        }
    }

    /// Run one dequeue transaction
    ///
    /// A non-empty batch is committed before it is returned; an empty poll or a fault
    /// rolls the transaction back.
    pub async fn poll_once(&self) -> DomainResult<PollOutcome> {
        let mut tx = self.broker.begin().await?;
        let mut batch = Vec::with_capacity(self.config.batch_size);

        while batch.len() < self.config.batch_size {
            match tx.dequeue_one().await {
                Ok(Some(event)) => batch.push(event),
                Ok(None) => break,
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!(error = %rollback, "rollback after dequeue fault failed");
                    }
                    return Err(e);
                }
            }
        }

        if batch.is_empty() {
            tx.rollback().await?;
            return Ok(PollOutcome::Empty);
        }
        tx.commit().await?;
        debug!(count = batch.len(), "dequeued batch");
        Ok(PollOutcome::Batch(batch))
    }

    /// Poll until a batch arrives; `None` only once `ctx` is cancelled
    pub async fn next_batch(&self, ctx: &CancellationToken) -> Option<Vec<TapEvent>> {
        loop {
            let polled = tokio::select! {
                biased;
                _ = ctx.cancelled() => return None,
                polled = self.poll_once() => polled,
            };

            let wait = match polled {
                Ok(PollOutcome::Batch(batch)) => return Some(batch),
                Ok(PollOutcome::Empty) => self.config.poll_delay,
                Err(e) => {
                    self.faults.report(PipelineFault::new(
                        FaultKind::DequeueFailure,
                        COMPONENT,
                        e.to_string(),
                    ));
                    self.config.fault_backoff
                }
            };

            tokio::select! {
                _ = ctx.cancelled() => return None,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Endless stream of committed batches that ends when `ctx` is cancelled
    pub fn batches(self, ctx: CancellationToken) -> impl Stream<Item = Vec<TapEvent>> {
        futures::stream::unfold((self, ctx), |(consumer, ctx)| async move {
            let batch = consumer.next_batch(&ctx).await?;
            Some((batch, (consumer, ctx)))
        })
    }
}
