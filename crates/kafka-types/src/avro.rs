//! Avro conversion: schema-registry framed datum → DecodedValue.
//!
//! Payloads use the Confluent wire format: one magic byte (`0`), a 4-byte
//! big-endian schema id, then the binary Avro datum. The datum is decoded with
//! `apache_avro` against the registry schema and then converted with the schema
//! at hand, because logical decimals only carry their scale in the schema.
//!
//! Unions are flattened to the selected branch, `date` and `timestamp-*`
//! logical types become UTC timestamps.

use crate::error::{KafkaTypesError, Result};
use crate::value::{DecodedValue, FieldMap};
use apache_avro::schema::Name;
use apache_avro::types::Value;
use apache_avro::Schema;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::trace;

/// Named types defined by a schema, used to resolve `Schema::Ref`.
pub type Names = HashMap<Name, Schema>;

const MAGIC_BYTE: u8 = 0;
const HEADER_LEN: usize = 5;

/// Split a Confluent-framed payload into its schema id and Avro datum.
pub fn parse_wire_header(bytes: &[u8]) -> Result<(u32, &[u8])> {
    if bytes.len() < HEADER_LEN {
        return Err(KafkaTypesError::WireFormat(format!(
            "payload of {} bytes is shorter than the {HEADER_LEN}-byte header",
            bytes.len()
        )));
    }
    if bytes[0] != MAGIC_BYTE {
        return Err(KafkaTypesError::WireFormat(format!(
            "unexpected magic byte {:#04x}",
            bytes[0]
        )));
    }
    let schema_id = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    Ok((schema_id, &bytes[HEADER_LEN..]))
}

/// Frame an Avro datum with the Confluent header.
pub fn encode_wire_format(schema_id: u32, datum: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(HEADER_LEN + datum.len());
    framed.push(MAGIC_BYTE);
    framed.extend_from_slice(&schema_id.to_be_bytes());
    framed.extend_from_slice(datum);
    framed
}

/// Convert a decoded Avro record into a field map.
///
/// Fails with [`KafkaTypesError::NotAnObject`] if the top-level datum is not a
/// record or map.
pub fn avro_to_field_map(value: Value, schema: &Schema, names: &Names) -> Result<FieldMap> {
    match avro_to_decoded(value, schema, names)? {
        DecodedValue::Map(fields) => Ok(fields),
        other => Err(KafkaTypesError::NotAnObject(other.kind())),
    }
}

/// Convert an Avro value, using `schema` for decimal scales and union branches.
pub fn avro_to_decoded(value: Value, schema: &Schema, names: &Names) -> Result<DecodedValue> {
    let schema = resolve(schema, names);
    match (value, schema) {
        (Value::Union(index, inner), Schema::Union(union)) => {
            match union.variants().get(index as usize) {
                Some(variant) => avro_to_decoded(*inner, variant, names),
                None => without_schema(*inner),
            }
        }
        (Value::Record(fields), Schema::Record(record)) => {
            let mut map = FieldMap::with_capacity(fields.len());
            for (name, field_value) in fields {
                let decoded = match record.fields.iter().find(|f| f.name == name) {
                    Some(field) => avro_to_decoded(field_value, &field.schema, names)?,
                    None => without_schema(field_value)?,
                };
                map.insert(name, decoded);
            }
            Ok(DecodedValue::Map(map))
        }
        (Value::Array(items), Schema::Array(array)) => items
            .into_iter()
            .map(|item| avro_to_decoded(item, &array.items, names))
            .collect::<Result<Vec<_>>>()
            .map(DecodedValue::Array),
        (Value::Map(entries), Schema::Map(map)) => {
            let mut decoded = FieldMap::with_capacity(entries.len());
            for (key, entry) in entries {
                decoded.insert(key, avro_to_decoded(entry, &map.types, names)?);
            }
            Ok(DecodedValue::Map(decoded))
        }
        (Value::Decimal(decimal), Schema::Decimal(decimal_schema)) => {
            decimal_value(&decimal, decimal_schema.scale)
        }
        (value, _) => without_schema(value),
    }
}

fn resolve<'a>(schema: &'a Schema, names: &'a Names) -> &'a Schema {
    match schema {
        Schema::Ref { name } => names.get(name).unwrap_or(schema),
        other => other,
    }
}

fn without_schema(value: Value) -> Result<DecodedValue> {
    Ok(match value {
        Value::Null => DecodedValue::Null,
        Value::Boolean(b) => DecodedValue::Bool(b),
        Value::Int(i) => DecodedValue::Int(i64::from(i)),
        Value::Long(l) => DecodedValue::Int(l),
        Value::Float(f) => DecodedValue::Float(f64::from(f)),
        Value::Double(d) => DecodedValue::Float(d),
        Value::Bytes(b) | Value::Fixed(_, b) => DecodedValue::Bytes(b),
        Value::String(s) | Value::Enum(_, s) => DecodedValue::String(s),
        Value::Uuid(u) => DecodedValue::String(u.to_string()),
        Value::Union(_, inner) => without_schema(*inner)?,
        Value::Array(items) => DecodedValue::Array(
            items
                .into_iter()
                .map(without_schema)
                .collect::<Result<Vec<_>>>()?,
        ),
        Value::Map(entries) => {
            let mut map = FieldMap::with_capacity(entries.len());
            for (key, entry) in entries {
                map.insert(key, without_schema(entry)?);
            }
            DecodedValue::Map(map)
        }
        Value::Record(fields) => {
            let mut map = FieldMap::with_capacity(fields.len());
            for (name, field) in fields {
                map.insert(name, without_schema(field)?);
            }
            DecodedValue::Map(map)
        }
        Value::Date(days) => DecodedValue::Timestamp(date_from_days(days)?),
        Value::TimestampMillis(ms) | Value::LocalTimestampMillis(ms) => DecodedValue::Timestamp(
            DateTime::from_timestamp_millis(ms).ok_or(KafkaTypesError::InvalidTimestamp(ms))?,
        ),
        Value::TimestampMicros(us) | Value::LocalTimestampMicros(us) => DecodedValue::Timestamp(
            DateTime::from_timestamp_micros(us).ok_or(KafkaTypesError::InvalidTimestamp(us))?,
        ),
        Value::TimeMillis(ms) => DecodedValue::Int(i64::from(ms)),
        Value::TimeMicros(us) => DecodedValue::Int(us),
        // No schema at hand means no scale; treat the unscaled value as integral.
        Value::Decimal(decimal) => decimal_value(&decimal, 0)?,
        Value::BigDecimal(big) => DecodedValue::Decimal(
            Decimal::from_str(&big.to_string())
                .map_err(|e| KafkaTypesError::Decimal(e.to_string()))?,
        ),
        other => {
            trace!("Dropping unsupported Avro value {other:?}");
            return Err(KafkaTypesError::UnsupportedType(format!("{other:?}")));
        }
    })
}

fn date_from_days(days: i32) -> Result<DateTime<Utc>> {
    let seconds = i64::from(days) * 86_400;
    DateTime::from_timestamp(seconds, 0).ok_or(KafkaTypesError::InvalidTimestamp(seconds))
}

fn decimal_value(decimal: &apache_avro::Decimal, scale: usize) -> Result<DecodedValue> {
    let bytes = Vec::<u8>::try_from(decimal).map_err(|e| KafkaTypesError::Decimal(e.to_string()))?;
    let unscaled = unscaled_from_be_bytes(&bytes)?;
    let scale = u32::try_from(scale)
        .map_err(|_| KafkaTypesError::Decimal(format!("scale {scale} out of range")))?;
    Decimal::try_from_i128_with_scale(unscaled, scale)
        .map(DecodedValue::Decimal)
        .map_err(|e| KafkaTypesError::Decimal(e.to_string()))
}

/// Two's-complement big-endian bytes to `i128`.
fn unscaled_from_be_bytes(bytes: &[u8]) -> Result<i128> {
    if bytes.len() > 16 {
        return Err(KafkaTypesError::Decimal(format!(
            "unscaled value of {} bytes exceeds 128 bits",
            bytes.len()
        )));
    }
    let negative = bytes.first().is_some_and(|b| b & 0x80 != 0);
    let mut acc: i128 = if negative { -1 } else { 0 };
    for b in bytes {
        acc = (acc << 8) | i128::from(*b);
    }
    Ok(acc)
}
