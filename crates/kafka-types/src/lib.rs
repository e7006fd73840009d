//! Decoded Kafka payload model for kafka-verify.
//!
//! This crate defines the value types the verification engine matches on and
//! the two conversion paths that produce them from raw record bytes.
//!
//! # Architecture
//!
//! ```text
//! Avro: [magic][schema id][datum] → apache_avro::types::Value → DecodedValue
//! JSON: UTF-8 object bytes        → serde_json::Value         → DecodedValue
//! ```
//!
//! # Modules
//!
//! - [`value`] - `DecodedValue`, `FieldMap` and `ExpectedValue`
//! - [`message`] - raw fetched `Record`
//! - [`avro`] - Confluent wire framing and Avro → `DecodedValue` conversion
//! - [`json`] - JSON → `DecodedValue` conversion
//! - [`error`] - Error types for conversion operations

pub mod avro;
pub mod error;
pub mod json;
pub mod message;
pub mod value;

// Re-export main types for convenient access
pub use avro::{avro_to_decoded, avro_to_field_map, encode_wire_format, parse_wire_header, Names};
pub use error::{KafkaTypesError, Result};
pub use json::{json_object, json_to_decoded};
pub use message::Record;
pub use value::{DecodedValue, ExpectedValue, FieldMap};
