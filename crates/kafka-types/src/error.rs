//! Error types for kafka-types crate.

use thiserror::Error;

/// Errors that can occur while decoding Kafka payloads.
#[derive(Error, Debug)]
pub enum KafkaTypesError {
    #[error("Avro decoding error: {0}")]
    AvroDecode(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("Invalid wire format: {0}")]
    WireFormat(String),

    #[error("Invalid decimal: {0}")]
    Decimal(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error("Expected an object payload, got {0}")]
    NotAnObject(&'static str),

    #[error("Unsupported type: {0}")]
    UnsupportedType(String),
}

/// Result type alias for kafka-types operations.
pub type Result<T> = std::result::Result<T, KafkaTypesError>;
