//! Record-to-bundle matching.
//!
//! Three stages, cheapest first: a key filter over all live bundles, then
//! identification of a single bundle by its logical key, then comparison of
//! the identified bundle's expected values.

use crate::bundle::TestBundle;
use crate::error::MatchError;
use chrono::{DateTime, Utc};
use kafka_types::{json_object, DecodedValue, ExpectedValue, FieldMap};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::trace;

/// Whether every expected business-key field is present in `key` and equal
/// after normalizing both sides to a 32-bit integer.
pub fn key_matches(bundle: &TestBundle, key: &FieldMap) -> bool {
    bundle.expected_key.iter().all(|(field, expected)| {
        let Ok(expected) = expected.trim().parse::<i32>() else {
            return false;
        };
        key.get(field)
            .and_then(|actual| actual.unwrap_union().as_i32())
            == Some(expected)
    })
}

/// Coarse accept/reject: true if any live bundle passes the key check.
pub fn filter_by_key_map(bundles: &[Arc<TestBundle>], key: &FieldMap) -> bool {
    bundles.iter().any(|bundle| key_matches(bundle, key))
}

/// Identify the first bundle whose key and logical key both match.
///
/// Dotted logical-key paths whose outer field holds JSON text are parsed once
/// and the parsed map is written back into `value`.
pub fn find_by_key_index(
    bundles: &[Arc<TestBundle>],
    key: &FieldMap,
    value: &mut FieldMap,
) -> Option<Arc<TestBundle>> {
    bundles
        .iter()
        .find(|bundle| key_matches(bundle, key) && logical_key_matches(bundle, value))
        .cloned()
}

fn logical_key_matches(bundle: &TestBundle, value: &mut FieldMap) -> bool {
    for (path, expected) in &bundle.expected_logical_key {
        let actual = match split_path(path) {
            Some((outer, inner)) => nested_string(value, outer, inner),
            None => value.get(path.as_str()).and_then(string_of),
        };
        if actual != Some(expected.as_str()) {
            trace!(
                "Bundle {} logical key {path} expected {expected} found {actual:?}",
                bundle.name
            );
            return false;
        }
    }
    true
}

fn split_path(path: &str) -> Option<(&str, &str)> {
    match path.split_once('.') {
        Some((outer, inner)) if !outer.is_empty() => Some((outer, inner)),
        _ => None,
    }
}

fn string_of(value: &DecodedValue) -> Option<&str> {
    value.as_str().or_else(|| value.union_string())
}

fn nested_string<'a>(value: &'a mut FieldMap, outer: &str, inner: &str) -> Option<&'a str> {
    let parsed = match value.get(outer) {
        Some(DecodedValue::Map(m)) if m.len() != 1 || !m.contains_key("string") => None,
        Some(v) => string_of(v).and_then(|text| json_object(text.as_bytes()).ok()),
        None => return None,
    };
    if let Some(parsed) = parsed {
        value.insert(outer.to_string(), DecodedValue::Map(parsed));
    }
    value
        .get(outer)
        .and_then(DecodedValue::as_map)
        .and_then(|nested| nested.get(inner))
        .and_then(string_of)
}

/// Compare every expected value of an identified bundle against the record.
///
/// Fields are checked in name order so the reported mismatch is stable.
pub fn compare_values(bundle: &TestBundle, value: &FieldMap, topic: &str) -> Result<(), MatchError> {
    let mut fields: Vec<_> = bundle.expected_value.iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    for (field, expected) in fields {
        let Some(actual) = value.get(field) else {
            return Err(MatchError::MissingValueKey {
                topic: topic.to_string(),
                key: field.clone(),
            });
        };
        compare(field, expected, actual.unwrap_union())?;
    }
    Ok(())
}

/// Compare one field. The semantics follow the shape of `actual`: numeric
/// equality for decimals, case-sensitive equality for strings, instant
/// equality for timestamps.
pub fn compare(key: &str, expected: &ExpectedValue, actual: &DecodedValue) -> Result<(), MatchError> {
    match expected {
        ExpectedValue::Decimal(e) => {
            let actual_decimal = match actual {
                DecodedValue::Decimal(a) => Some(*a),
                DecodedValue::Int(a) => Some(Decimal::from(*a)),
                DecodedValue::Float(a) => Decimal::try_from(*a).ok(),
                DecodedValue::String(a) => Decimal::from_str(a.trim()).ok(),
                other => return Err(type_mismatch(key, expected, other)),
            };
            match actual_decimal {
                Some(a) if a == *e => Ok(()),
                _ => Err(MatchError::DecimalMismatch {
                    key: key.to_string(),
                    expected: e.to_string(),
                    actual: actual.to_string(),
                }),
            }
        }
        ExpectedValue::String(e) => {
            let equal = match actual {
                DecodedValue::String(a) => a == e,
                DecodedValue::Int(_) | DecodedValue::Bool(_) | DecodedValue::Decimal(_) => {
                    actual.to_string() == *e
                }
                DecodedValue::Timestamp(a) => parse_instant(e).is_some_and(|e| e == *a),
                other => return Err(type_mismatch(key, expected, other)),
            };
            if equal {
                Ok(())
            } else {
                Err(MatchError::StringMismatch {
                    key: key.to_string(),
                    expected: e.clone(),
                    actual: actual.to_string(),
                })
            }
        }
        ExpectedValue::Timestamp(e) => {
            let actual_instant = match actual {
                DecodedValue::Timestamp(a) => Some(*a),
                DecodedValue::String(a) => parse_instant(a),
                other => return Err(type_mismatch(key, expected, other)),
            };
            match actual_instant {
                Some(a) if a == *e => Ok(()),
                _ => Err(MatchError::TimeMismatch {
                    key: key.to_string(),
                    expected: e.to_rfc3339(),
                    actual: actual.to_string(),
                }),
            }
        }
    }
}

fn parse_instant(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn type_mismatch(key: &str, expected: &ExpectedValue, actual: &DecodedValue) -> MatchError {
    let expected = match expected {
        ExpectedValue::String(_) => "string",
        ExpectedValue::Decimal(_) => "decimal",
        ExpectedValue::Timestamp(_) => "timestamp",
    };
    MatchError::TypeMismatch {
        key: key.to_string(),
        expected: expected.to_string(),
        actual: actual.kind(),
    }
}
