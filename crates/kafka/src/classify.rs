//! Ordered classification of fetch-level errors.
//!
//! The order is significant: an authorization failure carried by a transport
//! error is still an authorization failure, and a timed-out connect is not
//! retried the way a dropped one is.

use crate::error::PollError;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use std::io::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Topic, group or cluster authorization denied. Fatal.
    Auth,
    /// The client reports itself closed.
    ClientClosed,
    /// Poll canceled or its deadline elapsed.
    Canceled,
    /// Dropped connection that a fresh client is expected to fix.
    Transient,
    /// Broker unreachable in a way retrying cannot fix. Fatal.
    Unrecoverable,
    /// Anything else, retried immediately.
    Other,
}

impl ErrorClass {
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Auth | Self::Unrecoverable)
    }
}

pub fn classify(error: &PollError) -> ErrorClass {
    if is_auth(error) {
        return ErrorClass::Auth;
    }
    match error {
        PollError::ClientClosed => ErrorClass::ClientClosed,
        PollError::Canceled | PollError::DeadlineExceeded => ErrorClass::Canceled,
        PollError::Io(e) => classify_io(e),
        PollError::Kafka(e) => classify_kafka(e),
        PollError::Other(msg) => classify_message(msg),
    }
}

fn is_auth(error: &PollError) -> bool {
    if let PollError::Kafka(e) = error {
        if matches!(
            e.rdkafka_error_code(),
            Some(
                RDKafkaErrorCode::TopicAuthorizationFailed
                    | RDKafkaErrorCode::GroupAuthorizationFailed
                    | RDKafkaErrorCode::ClusterAuthorizationFailed
            )
        ) {
            return true;
        }
    }
    let text = error.to_string();
    text.contains("TOPIC_AUTHORIZATION_FAILED") || text.contains("TopicAuthorizationFailed")
}

fn classify_io(e: &std::io::Error) -> ErrorClass {
    match e.kind() {
        ErrorKind::UnexpectedEof | ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => {
            ErrorClass::Transient
        }
        ErrorKind::ConnectionRefused | ErrorKind::TimedOut => ErrorClass::Unrecoverable,
        _ => {
            let inner_refused = e
                .get_ref()
                .is_some_and(|inner| inner.to_string().to_lowercase().contains("connection refused"));
            if inner_refused {
                ErrorClass::Unrecoverable
            } else {
                classify_message(&e.to_string())
            }
        }
    }
}

fn classify_kafka(e: &KafkaError) -> ErrorClass {
    match e.rdkafka_error_code() {
        Some(RDKafkaErrorCode::BrokerTransportFailure | RDKafkaErrorCode::NetworkException) => {
            ErrorClass::Transient
        }
        Some(
            RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::Resolve
            | RDKafkaErrorCode::RequestTimedOut,
        ) => ErrorClass::Unrecoverable,
        _ => classify_message(&e.to_string()),
    }
}

fn classify_message(msg: &str) -> ErrorClass {
    let lower = msg.to_lowercase();
    if lower.contains("eof")
        || lower.contains("broken pipe")
        || lower.contains("connection reset")
    {
        ErrorClass::Transient
    } else if lower.contains("connection refused")
        || lower.contains("host unreachable")
        || lower.contains("no route to host")
        || lower.contains("network unreachable")
        || lower.contains("network is unreachable")
        || lower.contains("i/o timeout")
    {
        ErrorClass::Unrecoverable
    } else {
        ErrorClass::Other
    }
}
