use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("record truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("invalid length prefix {0}")]
    InvalidLength(i32),

    #[error("field {field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("field {field} is empty")]
    EmptyField { field: &'static str },

    #[error("message id {0:?} is not a valid UUID")]
    InvalidMessageId(String),

    #[error("unknown tap type code {0}")]
    UnknownTapType(i32),

    #[error("field {field} is {len} bytes, exceeding the i32 length prefix")]
    FieldTooLong { field: &'static str, len: usize },

    #[error("timestamp is outside the encodable range")]
    TimestampOutOfRange,
}
