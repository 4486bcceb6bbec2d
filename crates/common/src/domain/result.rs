use thiserror::Error;

use crate::codec::CodecError;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unknown tap type: {0}")]
    UnknownTapType(i32),

    #[error("Ingestion is shutting down")]
    ShuttingDown,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Queue is full")]
    QueueFull,

    #[error("Queue is closed")]
    QueueClosed,

    #[error("Failed to publish batch of {count} events: {source}")]
    PublishFailed {
        count: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to dequeue from broker: {0}")]
    DequeueFailed(#[source] anyhow::Error),

    #[error("Failed to write archive: {0}")]
    ArchiveWriteFailed(#[source] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Broker error: {0}")]
    BrokerError(#[from] anyhow::Error),
}
