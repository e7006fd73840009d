//! Decoded payload values.
//!
//! Both decode paths (Avro and JSON) produce a [`FieldMap`] of [`DecodedValue`]s,
//! so the matching engine compares over a closed set of variants instead of
//! inspecting runtime types.

use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;

/// Decoded key or value fields of one record.
pub type FieldMap = HashMap<String, DecodedValue>;

/// A single decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    Null,
    Bool(bool),
    /// Avro int/long and integral JSON numbers
    Int(i64),
    Float(f64),
    String(String),
    /// Avro logical decimals and fractional JSON numbers
    Decimal(Decimal),
    /// Avro date/timestamp logical types, always UTC
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
    Array(Vec<DecodedValue>),
    Map(FieldMap),
}

impl DecodedValue {
    /// Short name of the variant, used in mismatch messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Decimal(_) => "decimal",
            Self::Timestamp(_) => "timestamp",
            Self::Bytes(_) => "bytes",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&FieldMap> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Normalize a business-key field to a 32-bit integer.
    ///
    /// Avro keys arrive as `int`, JSON keys are usually string-encoded
    /// integers; both normalize to the same `i32`.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int(i) => i32::try_from(*i).ok(),
            Self::String(s) => s.trim().parse::<i32>().ok(),
            Self::Decimal(d) if d.fract().is_zero() => d.to_i32(),
            _ => None,
        }
    }

    /// String payload of an Avro-union style wrapper such as `{"string": "X"}`.
    pub fn union_string(&self) -> Option<&str> {
        self.as_map()
            .and_then(|m| m.get("string"))
            .and_then(DecodedValue::as_str)
    }

    /// Unwrap a single-entry union wrapper (`{"string": ..}`, `{"bytes.decimal": ..}`)
    /// to its inner value; any other value is returned as-is.
    pub fn unwrap_union(&self) -> &DecodedValue {
        match self {
            Self::Map(m) if m.len() == 1 => match m.iter().next() {
                Some((branch, inner)) if is_union_branch(branch) => inner,
                _ => self,
            },
            _ => self,
        }
    }
}

fn is_union_branch(name: &str) -> bool {
    matches!(
        name,
        "string" | "int" | "long" | "double" | "float" | "boolean" | "bytes"
    ) || name.starts_with("bytes.")
        || name.starts_with("int.")
        || name.starts_with("long.")
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Bytes(b) => write!(f, "{} bytes", b.len()),
            Self::Array(items) => write!(f, "array of {} elements", items.len()),
            Self::Map(m) => write!(f, "map of {} entries", m.len()),
        }
    }
}

/// A value a test bundle expects to find in a matched record.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpectedValue {
    /// Compared case-sensitively
    String(String),
    /// Compared numerically, independent of scale
    Decimal(Decimal),
    /// Compared after normalizing to UTC
    Timestamp(DateTime<Utc>),
}

impl ExpectedValue {
    /// Copy with surrounding whitespace removed from string expectations.
    pub fn trimmed(&self) -> Self {
        match self {
            Self::String(s) => Self::String(s.trim().to_string()),
            other => other.clone(),
        }
    }
}

impl fmt::Display for ExpectedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

impl From<&str> for ExpectedValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ExpectedValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Decimal> for ExpectedValue {
    fn from(d: Decimal) -> Self {
        Self::Decimal(d)
    }
}

impl From<DateTime<Utc>> for ExpectedValue {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Timestamp(t)
    }
}

impl From<DateTime<FixedOffset>> for ExpectedValue {
    fn from(t: DateTime<FixedOffset>) -> Self {
        Self::Timestamp(t.with_timezone(&Utc))
    }
}
