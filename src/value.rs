//! Typed attribute values and the single text coercion routine shared by record mapping and filter literals.

use crate::config::ValueKind;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Canonical datetime text form (fraction only when non-zero).
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

const DATETIME_INPUT_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Decimal(f64),
    Text(String),
    Boolean(bool),
    DateTime(NaiveDateTime),
    /// Byte length of stored binary content; the content itself is streamed separately.
    Blob(u64),
    Reference(i64),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("'{input}' is not a valid {kind} value")]
pub struct CoerceError {
    pub kind: ValueKind,
    pub input: String,
}

/// Parse `raw` as a value of `kind`.
pub fn coerce(kind: ValueKind, raw: &str) -> Result<Value, CoerceError> {
    let fail = || CoerceError {
        kind,
        input: raw.to_string(),
    };
    match kind {
        ValueKind::Integer => raw.parse::<i64>().map(Value::Integer).map_err(|_| fail()),
        ValueKind::Reference => raw.parse::<i64>().map(Value::Reference).map_err(|_| fail()),
        ValueKind::Decimal => match raw.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(Value::Decimal(n)),
            _ => Err(fail()),
        },
        ValueKind::Text => Ok(Value::Text(raw.to_string())),
        ValueKind::Boolean => {
            if raw.eq_ignore_ascii_case("true") {
                Ok(Value::Boolean(true))
            } else if raw.eq_ignore_ascii_case("false") {
                Ok(Value::Boolean(false))
            } else {
                Err(fail())
            }
        }
        ValueKind::DateTime => parse_datetime(raw).map(Value::DateTime).ok_or_else(fail),
        ValueKind::Blob => Err(fail()),
    }
}

fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_INPUT_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Order between two non-null values of compatible kinds; `None` otherwise.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b))
            | (Value::Reference(a), Value::Reference(b))
            | (Value::Integer(a), Value::Reference(b))
            | (Value::Reference(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Decimal(a), Value::Decimal(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Blob(a), Value::Blob(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order used for sorting: nulls after every value.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Integer(n) | Value::Reference(n) => write!(f, "{}", n),
            Value::Decimal(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            Value::Blob(len) => write!(f, "{}", len),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Integer(n) | Value::Reference(n) => serializer.serialize_i64(*n),
            Value::Decimal(n) => serializer.serialize_f64(*n),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::DateTime(_) => serializer.collect_str(self),
            Value::Blob(len) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("length", len)?;
                map.end()
            }
        }
    }
}
