//! Raw Kafka record type.
//!
//! Records are kept undecoded until the engine knows which decode path the
//! owning topic uses. They are shared between the client abstraction and the
//! matching code, which is why they live here rather than in the engine crate.

use chrono::{DateTime, Utc};

/// A fetched Kafka record with metadata.
#[derive(Debug, Clone)]
pub struct Record {
    /// Kafka topic name
    pub topic: String,
    /// Kafka partition number
    pub partition: i32,
    /// Kafka offset within the partition
    pub offset: i64,
    /// Raw key bytes (if any)
    pub key: Option<Vec<u8>>,
    /// Raw value bytes (if any)
    pub value: Option<Vec<u8>>,
    /// Broker or producer timestamp (if available)
    pub timestamp: Option<DateTime<Utc>>,
}

impl Record {
    /// Key bytes, or an empty slice for keyless records.
    pub fn key_bytes(&self) -> &[u8] {
        self.key.as_deref().unwrap_or_default()
    }

    /// Value bytes, or an empty slice for tombstones.
    pub fn value_bytes(&self) -> &[u8] {
        self.value.as_deref().unwrap_or_default()
    }

    /// Whether the record was produced before `instant`.
    ///
    /// Records without a timestamp are never considered stale.
    pub fn is_before(&self, instant: DateTime<Utc>) -> bool {
        self.timestamp.is_some_and(|ts| ts < instant)
    }
}
