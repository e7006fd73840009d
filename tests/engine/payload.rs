//! Record builders for JSON and Confluent-framed Avro payloads.

use apache_avro::types::Value;
use apache_avro::Schema;
use chrono::{DateTime, Utc};
use kafka_verify::types::encode_wire_format;
use kafka_verify::Record;

pub fn json_record(topic: &str, key: serde_json::Value, value: serde_json::Value) -> Record {
    Record {
        topic: topic.to_string(),
        partition: 0,
        offset: 0,
        key: Some(serde_json::to_vec(&key).unwrap()),
        value: Some(serde_json::to_vec(&value).unwrap()),
        timestamp: None,
    }
}

pub fn at(mut record: Record, timestamp: DateTime<Utc>) -> Record {
    record.timestamp = Some(timestamp);
    record
}

pub fn avro_bytes(schema_json: &str, schema_id: u32, value: Value) -> Vec<u8> {
    let schema = Schema::parse_str(schema_json).unwrap();
    let datum = apache_avro::to_avro_datum(&schema, value).unwrap();
    encode_wire_format(schema_id, &datum)
}

pub fn avro_record(topic: &str, key: Vec<u8>, value: Vec<u8>) -> Record {
    Record {
        topic: topic.to_string(),
        partition: 0,
        offset: 0,
        key: Some(key),
        value: Some(value),
        timestamp: None,
    }
}
