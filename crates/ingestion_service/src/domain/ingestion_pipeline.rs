use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use common::{
    bounded_queue, FaultKind, FaultReporter, PipelineFault, QueuePublisher, DEFAULT_QUEUE_CAPACITY,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::{AccumulatorReport, BatchAccumulator, BatchAccumulatorConfig, IngestionHandle};

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub queue_capacity: usize,
    pub accumulator: BatchAccumulatorConfig,
    /// Time allowed for the final flush once shutdown begins
    pub shutdown_budget: Duration,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            accumulator: BatchAccumulatorConfig::default(),
            shutdown_budget: Duration::from_secs(5),
        }
    }
}

/// How the pipeline came to a stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineShutdown {
    Drained(AccumulatorReport),
    /// The final flush overran the shutdown budget and was abandoned
    TimedOut,
}

/// Ingress to broker: a bounded queue drained by one batch accumulator
pub struct IngestionPipeline {
    accumulator: BatchAccumulator,
    handle: IngestionHandle,
    shutdown: CancellationToken,
    shutdown_budget: Duration,
    faults: FaultReporter,
}

impl IngestionPipeline {
    pub fn new(
        publisher: Arc<dyn QueuePublisher>,
        config: IngestionConfig,
        faults: FaultReporter,
    ) -> Self {
        let (producer, receiver) = bounded_queue(config.queue_capacity);
        let shutdown = CancellationToken::new();
        let accumulator =
            BatchAccumulator::new(receiver, publisher, config.accumulator, faults.clone());

        Self {
            accumulator,
            handle: IngestionHandle::new(producer, shutdown.clone()),
            shutdown,
            shutdown_budget: config.shutdown_budget,
            faults,
        }
    }

    pub fn handle(&self) -> IngestionHandle {
        self.handle.clone()
    }

    /// Run until `ctx` is cancelled, then stop accepting taps and flush within the budget
    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<PipelineShutdown> {
        // The pipeline's own handle keeps the queue open until `run` returns.
        let Self {
            accumulator,
            handle: _handle,
            shutdown,
            shutdown_budget,
            faults,
        } = self;

        let mut task = tokio::spawn(accumulator.run(shutdown.clone()));
        info!("ingestion pipeline started");

        tokio::select! {
            _ = ctx.cancelled() => {}
            joined = &mut task => {
                shutdown.cancel();
                return match joined {
                    Ok(_) => Err(anyhow!("batch accumulator stopped before shutdown")),
                    Err(e) => Err(anyhow!("batch accumulator task failed: {}", e)),
                };
            }
        }

        info!(budget = ?shutdown_budget, "ingestion pipeline shutting down");
        shutdown.cancel();

        match tokio::time::timeout(shutdown_budget, &mut task).await {
            Ok(Ok(report)) => Ok(PipelineShutdown::Drained(report)),
            Ok(Err(e)) => Err(anyhow!("batch accumulator task failed: {}", e)),
            Err(_) => {
                task.abort();
                faults.report(PipelineFault::new(
                    FaultKind::ShutdownTimeout,
                    "ingestion_pipeline",
                    format!("final flush exceeded shutdown budget of {:?}", shutdown_budget),
                ));
                warn!("ingestion pipeline stopped without completing its final flush");
                Ok(PipelineShutdown::TimedOut)
            }
        }
    }
}
