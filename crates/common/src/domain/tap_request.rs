use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::result::DomainResult;
use crate::domain::tap_event::{TapEvent, TapType};
use crate::garde::validate_struct;

/// Largest opaque payload accepted at ingress
pub const MAX_PAYLOAD_BYTES: usize = 1024;

/// Tap as submitted by a fare gate, before a message id is assigned
///
/// The payload travels as base64 in JSON and lands unchanged in the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TapRequest {
    #[garde(length(min = 1))]
    pub card_id: String,

    #[garde(length(min = 1))]
    pub station_id: String,

    #[garde(skip)]
    pub tap_type: TapType,

    #[serde(default)]
    #[garde(custom(validate_timestamp))]
    pub timestamp: DateTime<Utc>,

    #[serde(default, with = "payload_base64")]
    #[garde(length(max = 1024))]
    pub payload: Vec<u8>,
}

impl TapRequest {
    /// Validate the request and turn it into an event with a fresh message id
    pub fn into_event(self) -> DomainResult<TapEvent> {
        validate_struct(&self)?;
        Ok(TapEvent::new(
            Uuid::new_v4(),
            self.card_id,
            self.station_id,
            self.tap_type,
            self.timestamp,
            self.payload,
        ))
    }
}

impl TapEvent {
    pub fn from_request(request: TapRequest) -> DomainResult<TapEvent> {
        request.into_event()
    }
}

// The unset timestamp deserializes to the Unix epoch, which is never a real tap.
fn validate_timestamp(value: &DateTime<Utc>, _ctx: &()) -> garde::Result {
    if *value == DateTime::<Utc>::UNIX_EPOCH {
        return Err(garde::Error::new("timestamp must be set"));
    }
    if value.timestamp_nanos_opt().is_none() {
        return Err(garde::Error::new(
            "timestamp is outside the representable range",
        ));
    }
    Ok(())
}

mod payload_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainError;
    use chrono::TimeZone;

    fn valid_request() -> TapRequest {
        TapRequest {
            card_id: "card-42".to_string(),
            station_id: "central".to_string(),
            tap_type: TapType::Entry,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap(),
            payload: vec![0xde, 0xad],
        }
    }

    #[test]
    fn test_valid_request_becomes_event() {
        let event = valid_request().into_event().unwrap();
        assert_eq!(event.card_id(), "card-42");
        assert_eq!(event.station_id(), "central");
        assert_eq!(event.tap_type(), TapType::Entry);
        assert_eq!(event.payload().as_ref(), &[0xde, 0xad]);
        assert!(!event.message_id().is_nil());
    }

    #[test]
    fn test_each_event_gets_distinct_id() {
        let a = valid_request().into_event().unwrap();
        let b = valid_request().into_event().unwrap();
        assert_ne!(a.message_id(), b.message_id());
    }

    #[test]
    fn test_empty_card_id_rejected() {
        let mut request = valid_request();
        request.card_id.clear();
        let result = request.into_event();
        assert!(matches!(result, Err(DomainError::ValidationError(msg)) if msg.contains("card_id")));
    }

    #[test]
    fn test_unset_timestamp_rejected() {
        let mut request = valid_request();
        request.timestamp = DateTime::<Utc>::UNIX_EPOCH;
        assert!(matches!(
            request.into_event(),
            Err(DomainError::ValidationError(_))
        ));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut request = valid_request();
        request.payload = vec![0u8; MAX_PAYLOAD_BYTES + 1];
        assert!(matches!(
            request.into_event(),
            Err(DomainError::ValidationError(_))
        ));
    }

    #[test]
    fn test_deserializes_camel_case_json() {
        let json = r#"{
            "cardId": "card-7",
            "stationId": "harbour",
            "tapType": 2,
            "timestamp": "2024-03-01T08:30:00Z",
            "payload": "AQID"
        }"#;
        let request: TapRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.tap_type, TapType::Exit);
        assert_eq!(request.payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_missing_timestamp_fails_validation() {
        let json = r#"{"cardId": "c", "stationId": "s", "tapType": 1}"#;
        let request: TapRequest = serde_json::from_str(json).unwrap();
        assert!(request.payload.is_empty());
        assert!(request.into_event().is_err());
    }

    #[test]
    fn test_unknown_tap_type_in_json_rejected() {
        let json = r#"{"cardId": "c", "stationId": "s", "tapType": 3, "timestamp": "2024-03-01T08:30:00Z"}"#;
        assert!(serde_json::from_str::<TapRequest>(json).is_err());
    }
}
