//! Archive record format.
//!
//! Every record is a concatenation of little-endian fields with no header or padding:
//!
//! | field       | encoding                                  |
//! |-------------|-------------------------------------------|
//! | message id  | i32 byte length + UTF-8 hyphenated UUID   |
//! | card id     | i32 byte length + UTF-8                   |
//! | station id  | i32 byte length + UTF-8                   |
//! | tap type    | i32 (1 = entry, 2 = exit)                 |
//! | timestamp   | i64 nanoseconds since the Unix epoch, UTC |
//! | payload     | i32 byte length + raw bytes               |
//!
//! Records are self-delimiting, so a file is simply records written back to back.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::DateTime;
use uuid::Uuid;

use crate::codec::error::CodecError;
use crate::domain::{TapEvent, TapType};

const LENGTH_PREFIX: usize = 4;
const FIXED_FIELDS: usize = 4 + 8;

pub struct BinaryEncoder;

impl BinaryEncoder {
    /// Append one encoded record to `dst`
    ///
    /// `dst` is left untouched when the event cannot be encoded.
    pub fn encode(event: &TapEvent, dst: &mut BytesMut) -> Result<(), CodecError> {
        ensure_not_empty(event.card_id(), "card_id")?;
        ensure_not_empty(event.station_id(), "station_id")?;
        let nanos = event
            .timestamp()
            .timestamp_nanos_opt()
            .ok_or(CodecError::TimestampOutOfRange)?;

        let mut id_buf = Uuid::encode_buffer();
        let message_id = event.message_id().hyphenated().encode_lower(&mut id_buf);

        let fields: [(&'static str, &[u8]); 3] = [
            ("message_id", message_id.as_bytes()),
            ("card_id", event.card_id().as_bytes()),
            ("station_id", event.station_id().as_bytes()),
        ];
        let payload = event.payload().as_ref();

        let mut prefixes = [0i32; 4];
        for (slot, (field, value)) in prefixes
            .iter_mut()
            .zip(fields.iter().copied().chain([("payload", payload)]))
        {
            *slot = i32::try_from(value.len())
                .map_err(|_| CodecError::FieldTooLong { field, len: value.len() })?;
        }

        dst.reserve(Self::encoded_len(event));
        for ((_, value), len) in fields.iter().zip(prefixes) {
            dst.put_i32_le(len);
            dst.put_slice(value);
        }
        dst.put_i32_le(event.tap_type().code());
        dst.put_i64_le(nanos);
        dst.put_i32_le(prefixes[3]);
        dst.put_slice(payload);
        Ok(())
    }

    pub fn encode_to_bytes(event: &TapEvent) -> Result<Bytes, CodecError> {
        let mut dst = BytesMut::with_capacity(Self::encoded_len(event));
        Self::encode(event, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Size of the record `encode` writes for this event
    pub fn encoded_len(event: &TapEvent) -> usize {
        const HYPHENATED_UUID: usize = 36;
        LENGTH_PREFIX * 4
            + HYPHENATED_UUID
            + event.card_id().len()
            + event.station_id().len()
            + FIXED_FIELDS
            + event.payload().len()
    }

    /// Decode the first record in `src`, returning the event and the bytes it occupied
    ///
    /// `CodecError::Truncated` means `src` ends partway through a record; callers
    /// streaming from a file can read more and try again.
    pub fn decode(src: &[u8]) -> Result<(TapEvent, usize), CodecError> {
        let mut cursor = src;

        let message_id = read_string(&mut cursor, "message_id")?;
        let message_id =
            Uuid::parse_str(&message_id).map_err(|_| CodecError::InvalidMessageId(message_id))?;
        let card_id = read_string(&mut cursor, "card_id")?;
        ensure_not_empty(&card_id, "card_id")?;
        let station_id = read_string(&mut cursor, "station_id")?;
        ensure_not_empty(&station_id, "station_id")?;

        ensure_remaining(&cursor, FIXED_FIELDS)?;
        let code = cursor.get_i32_le();
        let tap_type = TapType::try_from(code).map_err(|_| CodecError::UnknownTapType(code))?;
        let timestamp = DateTime::from_timestamp_nanos(cursor.get_i64_le());

        let payload = read_bytes(&mut cursor)?;

        let consumed = src.len() - cursor.len();
        Ok((
            TapEvent::new(
                message_id,
                card_id,
                station_id,
                tap_type,
                timestamp,
                Bytes::copy_from_slice(payload),
            ),
            consumed,
        ))
    }
}

fn ensure_not_empty(value: &str, field: &'static str) -> Result<(), CodecError> {
    if value.is_empty() {
        return Err(CodecError::EmptyField { field });
    }
    Ok(())
}

fn ensure_remaining(cursor: &&[u8], needed: usize) -> Result<(), CodecError> {
    if cursor.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            available: cursor.len(),
        });
    }
    Ok(())
}

fn read_bytes<'a>(cursor: &mut &'a [u8]) -> Result<&'a [u8], CodecError> {
    ensure_remaining(cursor, LENGTH_PREFIX)?;
    let len = cursor.get_i32_le();
    let len = usize::try_from(len).map_err(|_| CodecError::InvalidLength(len))?;
    ensure_remaining(cursor, len)?;
    let remaining: &'a [u8] = cursor;
    let (value, rest) = remaining.split_at(len);
    *cursor = rest;
    Ok(value)
}

fn read_string(cursor: &mut &[u8], field: &'static str) -> Result<String, CodecError> {
    let raw = read_bytes(cursor)?;
    std::str::from_utf8(raw)
        .map(str::to_owned)
        .map_err(|_| CodecError::InvalidUtf8 { field })
}
