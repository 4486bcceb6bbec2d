use anyhow::Context;
use async_trait::async_trait;
use bytes::BytesMut;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::codec::BinaryEncoder;
use crate::domain::{DomainError, DomainResult, QueuePublisher, TapEvent};
use crate::postgres::PostgresClient;

const INSERT_MESSAGE: &str =
    "INSERT INTO tap_queue (queue_name, message_id, payload) VALUES ($1, $2, $3)";

/// Publishes batches into the `tap_queue` table, one transaction per batch
///
/// Each row carries the archive encoding of the event.
pub struct PostgresQueuePublisher {
    client: PostgresClient,
    queue_name: String,
    in_flight: Mutex<()>,
}

impl PostgresQueuePublisher {
    pub fn new(client: PostgresClient, queue_name: impl Into<String>) -> Self {
        Self {
            client,
            queue_name: queue_name.into(),
            in_flight: Mutex::new(()),
        }
    }

    async fn insert_batch(&self, batch: &[TapEvent]) -> anyhow::Result<()> {
        let mut conn = self.client.get_connection().await?;
        let tx = conn
            .transaction()
            .await
            .context("failed to begin publish transaction")?;
        let statement = tx.prepare_cached(INSERT_MESSAGE).await?;

        let mut record = BytesMut::with_capacity(256);
        for event in batch {
            record.clear();
            BinaryEncoder::encode(event, &mut record)?;
            let payload: &[u8] = &record;
            tx.execute(
                &statement,
                &[&self.queue_name, &event.message_id(), &payload],
            )
            .await
            .with_context(|| format!("failed to insert message {}", event.message_id()))?;
        }

        tx.commit()
            .await
            .context("failed to commit publish transaction")?;
        Ok(())
    }
}

#[async_trait]
impl QueuePublisher for PostgresQueuePublisher {
    #[instrument(skip(self, batch), fields(queue = %self.queue_name, count = batch.len()))]
    async fn publish_batch(&self, batch: &[TapEvent]) -> DomainResult<()> {
        let _guard = self.in_flight.lock().await;
        self.insert_batch(batch)
            .await
            .map_err(|source| DomainError::PublishFailed {
                count: batch.len(),
                source,
            })?;
        debug!("published batch");
        Ok(())
    }
}
