use anyhow::{Context, Result};
use tracing::info;

use super::PostgresClient;

const CREATE_QUEUE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS tap_queue (
    id BIGSERIAL PRIMARY KEY,
    queue_name TEXT NOT NULL,
    message_id UUID NOT NULL,
    payload BYTEA NOT NULL,
    enqueued_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS tap_queue_name_id_idx ON tap_queue (queue_name, id);
";

/// Create the queue table if it does not exist yet
///
/// Messages for every queue name share one table; dequeue order is insertion order.
pub async fn ensure_queue_schema(client: &PostgresClient) -> Result<()> {
    let conn = client.get_connection().await?;
    conn.batch_execute(CREATE_QUEUE_TABLE)
        .await
        .context("failed to create tap_queue table")?;
    info!("tap_queue schema ready");
    Ok(())
}
