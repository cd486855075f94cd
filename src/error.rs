//! # Error
//!
//! Every failure the writer can report. Nothing in this crate panics on bad input;
//! callers get one of these back instead.

use http::StatusCode;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The sample's values disagree with the data set describing them
    #[error("data set type {expected} does not match value list type {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// A gauge is NaN or infinite and no rate could stand in for it
    #[error("gauge value {value} of {name} is not finite")]
    InvalidGaugeValue { name: String, value: f64 },

    #[error("metadata entry {0} has an unexpected type")]
    InvalidMetadata(&'static str),

    #[error("sample carries {0} values, at most {max} are supported", max = crate::record::MAX_VALUES)]
    TooManyValues(usize),

    /// More tags than a record can hold; always a configuration problem
    #[error("record needs {needed} tags, capacity is {capacity}")]
    TagCapacity { needed: usize, capacity: usize },

    #[error("unable to encode record: {0}")]
    Encoding(String),

    #[error("fragment of {needed} bytes does not fit, {free} bytes free")]
    InsufficientSpace { needed: usize, free: usize },

    /// Still did not fit after the buffer was flushed
    #[error("record of {0} bytes is larger than an empty send buffer")]
    RecordTooLarge(usize),

    #[error("send buffer does not start with the fragment separator")]
    MalformedBuffer,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("remote rejected payload with status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Short label used for telemetry
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Error::TypeMismatch { .. } => "type_mismatch",
            Error::InvalidGaugeValue { .. } => "invalid_gauge_value",
            Error::InvalidMetadata(_) => "invalid_metadata",
            Error::TooManyValues(_) => "too_many_values",
            Error::TagCapacity { .. } => "tag_capacity",
            Error::Encoding(_) => "encoding",
            Error::InsufficientSpace { .. } => "insufficient_space",
            Error::RecordTooLarge(_) => "record_too_large",
            Error::MalformedBuffer => "malformed_buffer",
            Error::Transport(_) => "transport",
            Error::Status { .. } => "status",
            Error::Config(_) => "config",
        }
    }
}
