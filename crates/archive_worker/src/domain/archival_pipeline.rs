use std::sync::Arc;

use common::{FaultKind, FaultReporter, PipelineFault};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::{ArchiveWriter, QueueConsumer};

const COMPONENT: &str = "archive_writer";

/// Totals for one archival run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchivalReport {
    pub batches_archived: u64,
    pub events_archived: u64,
    pub batches_lost: u64,
    pub events_lost: u64,
}

/// Broker to archive file: consume committed batches and append each one
///
/// Batches are committed on the broker before they are written, so a failed write loses
/// the batch. The loop keeps polling after any failure.
pub struct ArchivalPipeline {
    consumer: QueueConsumer,
    writer: Arc<ArchiveWriter>,
    faults: FaultReporter,
}

impl ArchivalPipeline {
    pub fn new(consumer: QueueConsumer, writer: Arc<ArchiveWriter>, faults: FaultReporter) -> Self {
        Self {
            consumer,
            writer,
            faults,
        }
    }

    pub async fn run(self, ctx: CancellationToken) -> ArchivalReport {
        let mut report = ArchivalReport::default();
        info!("archival pipeline started");

        while let Some(batch) = self.consumer.next_batch(&ctx).await {
            match self.writer.write_batch(&batch).await {
                Ok(written) => {
                    report.batches_archived += 1;
                    report.events_archived += written as u64;
                    debug!(count = written, "batch archived");

                    let skipped = batch.len() - written;
                    if skipped > 0 {
                        report.events_lost += skipped as u64;
                        self.faults.report(
                            PipelineFault::new(
                                FaultKind::ArchiveWriteFailure,
                                COMPONENT,
                                format!("{} events could not be encoded", skipped),
                            )
                            .with_affected_events(skipped),
                        );
                    }
                }
                Err(e) => {
                    report.batches_lost += 1;
                    report.events_lost += batch.len() as u64;
                    self.faults.report(
                        PipelineFault::new(FaultKind::ArchiveWriteFailure, COMPONENT, e.to_string())
                            .with_affected_events(batch.len()),
                    );
                }
            }
        }

        info!(
            batches_archived = report.batches_archived,
            events_archived = report.events_archived,
            events_lost = report.events_lost,
            "archival pipeline stopped"
        );
        report
    }
}
