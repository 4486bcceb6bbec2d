use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::result::{DomainError, DomainResult};

/// Direction of a fare-card tap
///
/// The numeric codes are part of the archive and broker formats and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum TapType {
    Entry,
    Exit,
}

impl TapType {
    pub fn code(self) -> i32 {
        match self {
            TapType::Entry => 1,
            TapType::Exit => 2,
        }
    }
}

impl TryFrom<i32> for TapType {
    type Error = DomainError;

    fn try_from(value: i32) -> DomainResult<Self> {
        match value {
            1 => Ok(TapType::Entry),
            2 => Ok(TapType::Exit),
            other => Err(DomainError::UnknownTapType(other)),
        }
    }
}

impl From<TapType> for i32 {
    fn from(value: TapType) -> Self {
        value.code()
    }
}

impl std::fmt::Display for TapType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TapType::Entry => f.write_str("entry"),
            TapType::Exit => f.write_str("exit"),
        }
    }
}

/// A single fare-card tap flowing through the pipeline
///
/// Fields are immutable once the event is built. The payload is shared, so cloning an
/// event never copies opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapEvent {
    message_id: Uuid,
    card_id: String,
    station_id: String,
    tap_type: TapType,
    timestamp: DateTime<Utc>,
    payload: Bytes,
}

impl TapEvent {
    pub fn new(
        message_id: Uuid,
        card_id: impl Into<String>,
        station_id: impl Into<String>,
        tap_type: TapType,
        timestamp: DateTime<Utc>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            message_id,
            card_id: card_id.into(),
            station_id: station_id.into(),
            tap_type,
            timestamp,
            payload: payload.into(),
        }
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn card_id(&self) -> &str {
        &self.card_id
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    pub fn tap_type(&self) -> TapType {
        self.tap_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}
