use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::codec::BinaryEncoder;
use crate::domain::{DequeueBroker, DequeueTransaction, DomainError, DomainResult, TapEvent};
use crate::postgres::PostgresClient;

const DEQUEUE_ONE: &str = "
DELETE FROM tap_queue
WHERE id = (
    SELECT id FROM tap_queue
    WHERE queue_name = $1
    ORDER BY id
    FOR UPDATE SKIP LOCKED
    LIMIT 1
)
RETURNING id, payload";

/// Consuming side of the `tap_queue` table
///
/// Rows deleted inside a transaction stay locked against other consumers and come back
/// if the transaction rolls back.
#[derive(Clone)]
pub struct PostgresQueueBroker {
    client: PostgresClient,
    queue_name: String,
}

impl PostgresQueueBroker {
    pub fn new(client: PostgresClient, queue_name: impl Into<String>) -> Self {
        Self {
            client,
            queue_name: queue_name.into(),
        }
    }
}

#[async_trait]
impl DequeueBroker for PostgresQueueBroker {
    async fn begin(&self) -> DomainResult<Box<dyn DequeueTransaction>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::DequeueFailed)?;
        conn.batch_execute("BEGIN")
            .await
            .context("failed to begin dequeue transaction")
            .map_err(DomainError::DequeueFailed)?;
        Ok(Box::new(PostgresDequeueTransaction {
            conn: Some(conn),
            queue_name: self.queue_name.clone(),
            delivered: 0,
            discarded: 0,
        }))
    }
}

/// Transaction pinned to one pooled connection
///
/// `conn` is `None` once the transaction has been finished.
struct PostgresDequeueTransaction {
    conn: Option<deadpool_postgres::Client>,
    queue_name: String,
    delivered: usize,
    /// Undecodable rows deleted by this transaction
    discarded: usize,
}

impl PostgresDequeueTransaction {
    async fn finish(&mut self, statement: &str) -> DomainResult<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        if let Err(e) = conn.batch_execute(statement).await {
            // The connection state is unknown; keep it out of the pool.
            drop(deadpool_postgres::Client::take(conn));
            return Err(DomainError::DequeueFailed(
                anyhow::Error::new(e).context(format!("failed to {}", statement)),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DequeueTransaction for PostgresDequeueTransaction {
    async fn dequeue_one(&mut self) -> DomainResult<Option<TapEvent>> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| DomainError::DequeueFailed(anyhow::anyhow!("transaction finished")))?;
        let statement = conn
            .prepare_cached(DEQUEUE_ONE)
            .await
            .context("failed to prepare dequeue")
            .map_err(DomainError::DequeueFailed)?;

        loop {
            let Some(row) = conn
                .query_opt(&statement, &[&self.queue_name])
                .await
                .context("failed to dequeue message")
                .map_err(DomainError::DequeueFailed)?
            else {
                return Ok(None);
            };

            let id: i64 = row.get(0);
            let payload: &[u8] = row.get(1);
            match BinaryEncoder::decode(payload) {
                Ok((event, consumed)) => {
                    if consumed != payload.len() {
                        warn!(
                            id,
                            trailing = payload.len() - consumed,
                            "ignoring trailing bytes in queued message"
                        );
                    }
                    debug!(id, message_id = %event.message_id(), "dequeued message");
                    self.delivered += 1;
                    return Ok(Some(event));
                }
                Err(e) => {
                    error!(id, error = %e, "discarding undecodable queued message");
                    self.discarded += 1;
                }
            }
        }
    }

    async fn commit(mut self: Box<Self>) -> DomainResult<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(mut self: Box<Self>) -> DomainResult<()> {
        // Nothing was handed out, so committing only removes the undecodable rows.
        if self.delivered == 0 && self.discarded > 0 {
            debug!(discarded = self.discarded, "committing removal of undecodable messages");
            return self.finish("COMMIT").await;
        }
        self.finish("ROLLBACK").await
    }
}

impl Drop for PostgresDequeueTransaction {
    fn drop(&mut self) {
        // Closing the connection makes the server roll the open transaction back.
        if let Some(conn) = self.conn.take() {
            drop(deadpool_postgres::Client::take(conn));
        }
    }
}
