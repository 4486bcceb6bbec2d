use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use common::{FaultReporter, QueuePublisher};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::domain::{IngestionConfig, IngestionHandle, IngestionPipeline, PipelineShutdown};
use crate::tap_generator::{run_tap_generator, TapGeneratorConfig};

pub type ServiceProcess = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send,
>;

/// Publishing half of the system: the pipeline plus an optional synthetic tap source
pub struct IngestionService {
    pipeline: IngestionPipeline,
    generator: Option<TapGeneratorConfig>,
}

impl IngestionService {
    pub fn new(
        publisher: Arc<dyn QueuePublisher>,
        config: IngestionConfig,
        faults: FaultReporter,
    ) -> Self {
        info!(
            queue_capacity = config.queue_capacity,
            batch_size = config.accumulator.batch_size,
            "initializing ingestion service"
        );
        Self {
            pipeline: IngestionPipeline::new(publisher, config, faults),
            generator: None,
        }
    }

    pub fn with_tap_generator(mut self, config: TapGeneratorConfig) -> Self {
        self.generator = Some(config);
        self
    }

    /// Handle for an ingress layer hosted alongside the service
    pub fn handle(&self) -> IngestionHandle {
        self.pipeline.handle()
    }

    pub fn into_runner_processes(self) -> Vec<(&'static str, ServiceProcess)> {
        let mut processes: Vec<(&'static str, ServiceProcess)> = Vec::new();

        if let Some(config) = self.generator {
            let handle = self.pipeline.handle();
            processes.push((
                "tap_generator",
                Box::new(move |ctx| Box::pin(run_tap_generator(ctx, config, handle))),
            ));
        }

        let pipeline = self.pipeline;
        processes.push((
            "ingestion_pipeline",
            Box::new(move |ctx| {
                Box::pin(async move {
                    match pipeline.run(ctx).await? {
                        PipelineShutdown::Drained(report) => info!(
                            events_published = report.events_published,
                            abandoned = report.abandoned_in_queue,
                            "ingestion pipeline drained"
                        ),
                        PipelineShutdown::TimedOut => info!("ingestion pipeline abandoned"),
                    }
                    Ok(())
                })
            }),
        ));

        processes
    }
}
