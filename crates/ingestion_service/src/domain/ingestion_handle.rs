use common::{DomainError, DomainResult, EnqueueError, QueueProducer, TapEvent, TapRequest};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Cloneable entry point used by ingress to feed the pipeline
///
/// Every call fails fast with `DomainError::ShuttingDown` once the pipeline has begun
/// shutting down.
#[derive(Clone)]
pub struct IngestionHandle {
    producer: QueueProducer<TapEvent>,
    shutdown: CancellationToken,
}

impl IngestionHandle {
    pub(crate) fn new(producer: QueueProducer<TapEvent>, shutdown: CancellationToken) -> Self {
        Self { producer, shutdown }
    }

    /// Validate an ingress request and enqueue it, returning the assigned message id
    pub async fn submit(&self, request: TapRequest, ctx: &CancellationToken) -> DomainResult<Uuid> {
        let event = request.into_event()?;
        let message_id = event.message_id();
        self.enqueue(event, ctx).await?;
        debug!(%message_id, "tap accepted");
        Ok(message_id)
    }

    /// Enqueue an event, waiting while the queue is full
    ///
    /// `ctx` is the caller's own cancellation; it abandons the wait without enqueuing.
    pub async fn enqueue(&self, event: TapEvent, ctx: &CancellationToken) -> DomainResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(DomainError::ShuttingDown);
        }
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(DomainError::ShuttingDown),
            result = self.producer.enqueue(event, ctx) => result.map_err(enqueue_error),
        }
    }

    /// Enqueue without waiting; a full queue is reported as `DomainError::QueueFull`
    pub fn try_enqueue(&self, event: TapEvent) -> DomainResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(DomainError::ShuttingDown);
        }
        self.producer.try_enqueue(event).map_err(enqueue_error)
    }

    pub fn is_accepting(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Events waiting for the accumulator
    pub fn queued(&self) -> usize {
        self.producer.len()
    }
}

fn enqueue_error(e: EnqueueError<TapEvent>) -> DomainError {
    match e {
        EnqueueError::Full(_) => DomainError::QueueFull,
        EnqueueError::Cancelled(_) => DomainError::Cancelled,
        EnqueueError::Closed(_) => DomainError::QueueClosed,
    }
}
