//! JSON conversion: object bytes → DecodedValue.
//!
//! Integral numbers become [`DecodedValue::Int`], everything else numeric is
//! parsed from its textual form into an exact [`rust_decimal::Decimal`] so
//! that `1.50` and `1.5` compare equal downstream.

use crate::error::{KafkaTypesError, Result};
use crate::value::{DecodedValue, FieldMap};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Parse record bytes that must hold a JSON object.
pub fn json_object(bytes: &[u8]) -> Result<FieldMap> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| KafkaTypesError::JsonParse(e.to_string()))?;
    match json_to_decoded(value) {
        DecodedValue::Map(fields) => Ok(fields),
        other => Err(KafkaTypesError::NotAnObject(other.kind())),
    }
}

/// Convert a parsed JSON value.
pub fn json_to_decoded(value: Value) -> DecodedValue {
    match value {
        Value::Null => DecodedValue::Null,
        Value::Bool(b) => DecodedValue::Bool(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                DecodedValue::Int(i)
            } else {
                let text = n.to_string();
                Decimal::from_str(&text)
                    .or_else(|_| Decimal::from_scientific(&text))
                    .map(DecodedValue::Decimal)
                    .unwrap_or_else(|_| DecodedValue::Float(n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        Value::String(s) => DecodedValue::String(s),
        Value::Array(items) => {
            DecodedValue::Array(items.into_iter().map(json_to_decoded).collect())
        }
        Value::Object(obj) => DecodedValue::Map(
            obj.into_iter()
                .map(|(k, v)| (k, json_to_decoded(v)))
                .collect(),
        ),
    }
}
