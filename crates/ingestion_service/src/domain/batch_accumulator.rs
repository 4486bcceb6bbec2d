use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use common::{
    FaultKind, FaultReporter, PipelineFault, QueuePublisher, QueueReceiver, TapEvent, WaitOutcome,
};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const COMPONENT: &str = "batch_accumulator";

#[derive(Debug, Clone)]
pub struct BatchAccumulatorConfig {
    pub batch_size: usize,
    /// Pause after a failed publish or a loop fault
    pub backoff: Duration,
}

impl Default for BatchAccumulatorConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            backoff: Duration::from_millis(100),
        }
    }
}

/// What happened to the working buffer at shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FinalFlush {
    #[default]
    Empty,
    Published(usize),
    Failed(usize),
}

/// Totals for one accumulator run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccumulatorReport {
    pub batches_published: u64,
    pub events_published: u64,
    pub batches_dropped: u64,
    pub events_dropped: u64,
    pub final_flush: FinalFlush,
    /// Events still queued at shutdown; these are dropped unpublished
    pub abandoned_in_queue: usize,
}

enum Cycle {
    Continue,
    Cancelled,
}

#[derive(Debug)]
enum LoopFault {
    QueueClosed,
    PublisherPanicked(String),
}

impl std::fmt::Display for LoopFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopFault::QueueClosed => f.write_str("ingestion queue closed unexpectedly"),
            LoopFault::PublisherPanicked(msg) => write!(f, "publisher panicked: {}", msg),
        }
    }
}

/// The single consumer of the ingestion queue
///
/// Drains the queue into batches of at most `batch_size` and hands each one to the
/// publisher. A failed batch is dropped, never retried. The loop only ends when its
/// token is cancelled, after one final publish of the working buffer.
pub struct BatchAccumulator {
    receiver: QueueReceiver<TapEvent>,
    publisher: Arc<dyn QueuePublisher>,
    config: BatchAccumulatorConfig,
    faults: FaultReporter,
}

impl BatchAccumulator {
    pub fn new(
        receiver: QueueReceiver<TapEvent>,
        publisher: Arc<dyn QueuePublisher>,
        config: BatchAccumulatorConfig,
        faults: FaultReporter,
    ) -> Self {
        Self {
            receiver,
            publisher,
            config,
            faults,
        }
    }

    pub async fn run(mut self, ctx: CancellationToken) -> AccumulatorReport {
        let mut buffer: Vec<TapEvent> = Vec::with_capacity(self.config.batch_size);
        let mut report = AccumulatorReport::default();
        info!(batch_size = self.config.batch_size, "batch accumulator started");

        loop {
            match self.cycle(&mut buffer, &ctx, &mut report).await {
                Ok(Cycle::Continue) => {}
                Ok(Cycle::Cancelled) => break,
                Err(fault) => {
                    self.faults.report(
                        PipelineFault::new(FaultKind::LoopFailure, COMPONENT, fault.to_string())
                            .with_affected_events(buffer.len()),
                    );
                    buffer.clear();
                    if !self.backoff(&ctx).await {
                        break;
                    }
                }
            }
        }

        report.final_flush = self.final_flush(&mut buffer).await;
        if let FinalFlush::Published(count) = report.final_flush {
            report.batches_published += 1;
            report.events_published += count as u64;
        }

        report.abandoned_in_queue = self.receiver.close_and_discard();
        if report.abandoned_in_queue > 0 {
            warn!(
                count = report.abandoned_in_queue,
                "queued events were not flushed before shutdown"
            );
        }
        info!(
            batches_published = report.batches_published,
            events_published = report.events_published,
            events_dropped = report.events_dropped,
            "batch accumulator stopped"
        );
        report
    }

    async fn cycle(
        &mut self,
        buffer: &mut Vec<TapEvent>,
        ctx: &CancellationToken,
        report: &mut AccumulatorReport,
    ) -> Result<Cycle, LoopFault> {
        match self.receiver.wait_for_data(ctx).await {
            WaitOutcome::Ready => {}
            WaitOutcome::Cancelled => return Ok(Cycle::Cancelled),
            WaitOutcome::Closed => return Err(LoopFault::QueueClosed),
        }

        let room = self.config.batch_size.saturating_sub(buffer.len());
        self.receiver.drain_into(buffer, room);
        if buffer.is_empty() {
            return Ok(Cycle::Continue);
        }

        let publisher = &self.publisher;
        let batch: &[TapEvent] = buffer;
        let publish = AssertUnwindSafe(async move { publisher.publish_batch(batch).await });

        // An abandoned publish leaves the buffer intact for the final flush.
        let outcome = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Ok(Cycle::Cancelled),
            outcome = publish.catch_unwind() => outcome,
        };

        let count = buffer.len();
        match outcome {
            Ok(Ok(())) => {
                debug!(count, "published batch");
                report.batches_published += 1;
                report.events_published += count as u64;
                buffer.clear();
                Ok(Cycle::Continue)
            }
            Ok(Err(e)) => {
                self.faults.report(
                    PipelineFault::new(FaultKind::PublishFailure, COMPONENT, e.to_string())
                        .with_affected_events(count),
                );
                report.batches_dropped += 1;
                report.events_dropped += count as u64;
                buffer.clear();
                if self.backoff(ctx).await {
                    Ok(Cycle::Continue)
                } else {
                    Ok(Cycle::Cancelled)
                }
            }
            Err(panic) => Err(LoopFault::PublisherPanicked(panic_message(panic.as_ref()))),
        }
    }

    /// Sleep for the backoff; `false` when cancelled first
    async fn backoff(&self, ctx: &CancellationToken) -> bool {
        tokio::select! {
            _ = ctx.cancelled() => false,
            _ = tokio::time::sleep(self.config.backoff) => true,
        }
    }

    async fn final_flush(&self, buffer: &mut Vec<TapEvent>) -> FinalFlush {
        if buffer.is_empty() {
            return FinalFlush::Empty;
        }
        let count = buffer.len();
        info!(count, "flushing working buffer before shutdown");

        let batch: &[TapEvent] = buffer;
        let publisher = &self.publisher;
        let outcome = AssertUnwindSafe(async move { publisher.publish_batch(batch).await })
            .catch_unwind()
            .await;
        buffer.clear();

        match outcome {
            Ok(Ok(())) => FinalFlush::Published(count),
            Ok(Err(e)) => {
                self.faults.report(
                    PipelineFault::new(FaultKind::PublishFailure, COMPONENT, e.to_string())
                        .with_affected_events(count),
                );
                FinalFlush::Failed(count)
            }
            Err(panic) => {
                self.faults.report(
                    PipelineFault::new(
                        FaultKind::LoopFailure,
                        COMPONENT,
                        format!("publisher panicked: {}", panic_message(panic.as_ref())),
                    )
                    .with_affected_events(count),
                );
                FinalFlush::Failed(count)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{bounded_queue, DomainError, MockQueuePublisher, TapType};
    use std::sync::Mutex;
    use uuid::Uuid;

    fn tap(i: usize) -> TapEvent {
        TapEvent::new(
            Uuid::new_v4(),
            format!("card-{i}"),
            "station",
            TapType::Entry,
            chrono::Utc::now(),
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn test_batches_never_exceed_batch_size() {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let recorded = sizes.clone();
        let mut publisher = MockQueuePublisher::new();
        publisher.expect_publish_batch().returning(move |batch| {
            recorded.lock().unwrap().push(batch.len());
            Ok(())
        });

        let (producer, receiver) = bounded_queue(100);
        for i in 0..95 {
            producer.try_enqueue(tap(i)).unwrap();
        }

        let accumulator = BatchAccumulator::new(
            receiver,
            Arc::new(publisher),
            BatchAccumulatorConfig {
                batch_size: 10,
                ..Default::default()
            },
            FaultReporter::new(),
        );
        let ctx = CancellationToken::new();
        let task = tokio::spawn(accumulator.run(ctx.clone()));
        while sizes.lock().unwrap().iter().sum::<usize>() < 95 {
            tokio::task::yield_now().await;
        }
        ctx.cancel();
        let report = task.await.unwrap();

        let sizes = sizes.lock().unwrap();
        assert!(sizes.iter().all(|&n| n > 0 && n <= 10));
        assert_eq!(report.events_published, 95);
        assert_eq!(report.final_flush, FinalFlush::Empty);
    }

    #[tokio::test]
    async fn test_cancelled_while_idle_publishes_nothing() {
        let mut publisher = MockQueuePublisher::new();
        publisher.expect_publish_batch().never();

        let (_producer, receiver) = bounded_queue(8);
        let accumulator = BatchAccumulator::new(
            receiver,
            Arc::new(publisher),
            BatchAccumulatorConfig::default(),
            FaultReporter::new(),
        );
        let ctx = CancellationToken::new();
        ctx.cancel();
        let report = accumulator.run(ctx).await;
        assert_eq!(report, AccumulatorReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_is_dropped_not_retried() {
        let (calls_tx, mut calls) = tokio::sync::mpsc::unbounded_channel();
        let mut attempt = 0;
        let mut publisher = MockQueuePublisher::new();
        publisher.expect_publish_batch().times(2).returning(move |batch| {
            attempt += 1;
            let ids: Vec<Uuid> = batch.iter().map(TapEvent::message_id).collect();
            calls_tx
                .send((tokio::time::Instant::now(), ids))
                .unwrap();
            if attempt == 1 {
                Err(DomainError::PublishFailed {
                    count: batch.len(),
                    source: anyhow::anyhow!("broker unavailable"),
                })
            } else {
                Ok(())
            }
        });

        let (producer, receiver) = bounded_queue(100);
        let first: Vec<_> = (0..3).map(tap).collect();
        for event in &first {
            producer.try_enqueue(event.clone()).unwrap();
        }

        let (faults, mut fault_events) = FaultReporter::with_subscriber();
        let accumulator = BatchAccumulator::new(
            receiver,
            Arc::new(publisher),
            BatchAccumulatorConfig::default(),
            faults.clone(),
        );
        let ctx = CancellationToken::new();
        let task = tokio::spawn(accumulator.run(ctx.clone()));

        let (failed_at, failed_ids) = calls.recv().await.unwrap();
        assert_eq!(
            failed_ids,
            first.iter().map(TapEvent::message_id).collect::<Vec<_>>()
        );
        let fault = fault_events.recv().await.unwrap();
        assert_eq!(fault.kind, FaultKind::PublishFailure);
        assert_eq!(fault.affected_events, 3);

        let second: Vec<_> = (3..5).map(tap).collect();
        for event in &second {
            producer.try_enqueue(event.clone()).unwrap();
        }
        let (resumed_at, resumed_ids) = calls.recv().await.unwrap();
        assert!(resumed_at - failed_at >= Duration::from_millis(100));
        assert_eq!(
            resumed_ids,
            second.iter().map(TapEvent::message_id).collect::<Vec<_>>()
        );

        ctx.cancel();
        let report = task.await.unwrap();
        assert_eq!(report.batches_dropped, 1);
        assert_eq!(report.events_dropped, 3);
        assert_eq!(report.events_published, 2);
        assert_eq!(faults.snapshot().events_dropped, 3);
    }

    /// Panics on the first publish, succeeds afterwards
    struct PanicOncePublisher {
        calls: Mutex<Vec<usize>>,
    }

    #[async_trait::async_trait]
    impl QueuePublisher for PanicOncePublisher {
        async fn publish_batch(&self, batch: &[TapEvent]) -> common::DomainResult<()> {
            let first = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(batch.len());
                calls.len() == 1
            };
            if first {
                panic!("connection state corrupted");
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_publisher_panic_is_a_loop_fault() {
        let publisher = Arc::new(PanicOncePublisher {
            calls: Mutex::new(Vec::new()),
        });
        let (producer, receiver) = bounded_queue(100);
        producer.try_enqueue(tap(0)).unwrap();

        let (faults, mut fault_events) = FaultReporter::with_subscriber();
        let accumulator = BatchAccumulator::new(
            receiver,
            publisher.clone(),
            BatchAccumulatorConfig::default(),
            faults,
        );
        let ctx = CancellationToken::new();
        let task = tokio::spawn(accumulator.run(ctx.clone()));

        let fault = fault_events.recv().await.unwrap();
        assert_eq!(fault.kind, FaultKind::LoopFailure);
        assert!(fault.message.contains("connection state corrupted"));

        producer.try_enqueue(tap(1)).unwrap();
        while publisher.calls.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        ctx.cancel();
        let report = task.await.unwrap();
        assert_eq!(report.events_published, 1);
    }
}
