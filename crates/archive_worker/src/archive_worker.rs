use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use common::{DequeueBroker, FaultReporter};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::domain::{
    ArchivalPipeline, ArchiveWriter, ArchiveWriterConfig, QueueConsumer, QueueConsumerConfig,
};

pub struct ArchiveWorkerConfig {
    pub consumer: QueueConsumerConfig,
    pub writer: ArchiveWriterConfig,
}

/// Consuming half of the system
pub struct ArchiveWorker {
    pipeline: ArchivalPipeline,
}

impl ArchiveWorker {
    /// Open the archive file and wire it to a consumer of `broker`
    pub async fn new(
        broker: Arc<dyn DequeueBroker>,
        config: ArchiveWorkerConfig,
        faults: FaultReporter,
    ) -> anyhow::Result<Self> {
        info!(
            path = %config.writer.output_path.display(),
            batch_size = config.consumer.batch_size,
            "initializing archive worker"
        );
        let writer = Arc::new(ArchiveWriter::open(config.writer).await?);
        let consumer = QueueConsumer::new(broker, config.consumer, faults.clone());
        Ok(Self {
            pipeline: ArchivalPipeline::new(consumer, writer, faults),
        })
    }

    pub fn into_runner_process(
        self,
    ) -> Box<
        dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
            + Send,
    > {
        let pipeline = self.pipeline;
        Box::new(move |ctx| {
            Box::pin(async move {
                pipeline.run(ctx).await;
                Ok(())
            })
        })
    }
}
