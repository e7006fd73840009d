use crate::registry::ReaderKey;
use kafka_types::KafkaTypesError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Decode error: {0}")]
    Decode(#[from] KafkaTypesError),

    #[error("Schema registry error: {0}")]
    SchemaRegistry(String),

    #[error("Avro schema error: {0}")]
    AvroSchema(String),

    #[error("Critical failure. Attempt to use unregistered reader for topic: {0}")]
    UnregisteredReader(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Client creation failed: {0}")]
    ClientCreation(String),

    #[error("Reconnect failed for {key}: {reason}")]
    Reconnect { key: ReaderKey, reason: String },

    #[error("Poll failed: {0}")]
    Poll(#[from] PollError),

    #[error("Reader {0} is closed")]
    ReaderClosed(ReaderKey),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fetch-level failure reported by a [`KafkaClient`](crate::client::KafkaClient) poll.
///
/// Kept separate from [`Error`] because the engine classifies these rather
/// than propagating them.
#[derive(Error, Debug)]
pub enum PollError {
    #[error("client closed")]
    ClientClosed,

    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("kafka: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("network: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// A value comparison or identification failure, delivered through a bundle's
/// completion callback. Not an engine error: the engine keeps running.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("Failure: Key: {key} Value: decimal value mismatch expected: {expected} actual: {actual}")]
    DecimalMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Failure: string value mismatch Key: {key} Value: expected: {expected} actual: {actual}")]
    StringMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Failure: time value mismatch Key: {key} Value: expected: {expected} actual: {actual}")]
    TimeMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Failure: type mismatch Key: {key} expected {expected} but record holds {actual}")]
    TypeMismatch {
        key: String,
        expected: String,
        actual: &'static str,
    },

    #[error("Skipping event for topic: {topic}. Payload missing expected value key {key}")]
    MissingValueKey { topic: String, key: String },

    #[error("invalid and unregistered test, check testname: {0}")]
    UnregisteredTest(String),

    #[error("test setup failure: {0}")]
    Setup(String),

    #[error("timeout signal sent")]
    Aborted,
}
