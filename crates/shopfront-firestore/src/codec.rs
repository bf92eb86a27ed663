//! Native value codec.
//!
//! [`NativeValue`] is the in-process value space. [`encode`] and [`decode`]
//! map it to and from the tagged wire [`Value`] and are total: anything the
//! wire can carry that has no native counterpart decodes to a string or map
//! description instead of failing.

use std::collections::{BTreeMap, HashMap};

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::types::{ArrayValue, MapValue, Value};

/// Largest integer a double represents exactly (2^53 - 1).
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// Field map of a document.
pub type Fields = BTreeMap<String, NativeValue>;

/// A native value that can be stored in a document.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Array(Vec<NativeValue>),
    Map(Fields),
}

impl NativeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            NativeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            NativeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            NativeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            NativeValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Fields> {
        match self {
            NativeValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<&str> for NativeValue {
    fn from(value: &str) -> Self {
        NativeValue::String(value.to_string())
    }
}

impl From<String> for NativeValue {
    fn from(value: String) -> Self {
        NativeValue::String(value)
    }
}

impl From<i64> for NativeValue {
    fn from(value: i64) -> Self {
        NativeValue::Integer(value)
    }
}

impl From<u32> for NativeValue {
    fn from(value: u32) -> Self {
        NativeValue::Integer(i64::from(value))
    }
}

impl From<f64> for NativeValue {
    fn from(value: f64) -> Self {
        NativeValue::Double(value)
    }
}

impl From<bool> for NativeValue {
    fn from(value: bool) -> Self {
        NativeValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for NativeValue {
    fn from(value: DateTime<Utc>) -> Self {
        NativeValue::Timestamp(value)
    }
}

impl<T: Into<NativeValue>> From<Option<T>> for NativeValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(NativeValue::Null)
    }
}

impl<T: Into<NativeValue>> From<Vec<T>> for NativeValue {
    fn from(value: Vec<T>) -> Self {
        NativeValue::Array(value.into_iter().map(Into::into).collect())
    }
}

impl From<Fields> for NativeValue {
    fn from(value: Fields) -> Self {
        NativeValue::Map(value)
    }
}

/// Untyped JSON input, e.g. a request payload.
///
/// JSON has a single number type, so a number with no fractional part inside
/// the 53-bit safe range becomes an integer; other numbers become doubles.
/// Integers beyond the i64 range fall back to their decimal string.
impl From<serde_json::Value> for NativeValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => NativeValue::Null,
            serde_json::Value::Bool(b) => NativeValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    NativeValue::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    let in_safe_range = f.abs() <= MAX_SAFE_INTEGER as f64;
                    if n.is_f64() && f.fract() == 0.0 && in_safe_range {
                        NativeValue::Integer(f as i64)
                    } else if n.is_u64() {
                        NativeValue::String(n.to_string())
                    } else {
                        NativeValue::Double(f)
                    }
                } else {
                    NativeValue::String(n.to_string())
                }
            }
            serde_json::Value::String(s) => NativeValue::String(s),
            serde_json::Value::Array(items) => {
                NativeValue::Array(items.into_iter().map(NativeValue::from).collect())
            }
            serde_json::Value::Object(map) => NativeValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, NativeValue::from(v)))
                    .collect(),
            ),
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode a native value into its wire representation.
pub fn encode(value: &NativeValue) -> Value {
    match value {
        NativeValue::Null => Value::NullValue(()),
        NativeValue::Bool(b) => Value::BooleanValue(*b),
        NativeValue::Integer(i) => Value::IntegerValue(i.to_string()),
        NativeValue::Double(f) => Value::DoubleValue(*f),
        NativeValue::String(s) => Value::StringValue(s.clone()),
        NativeValue::Timestamp(ts) => {
            Value::TimestampValue(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }
        NativeValue::Array(items) => Value::ArrayValue(ArrayValue {
            values: Some(items.iter().map(encode).collect()),
        }),
        NativeValue::Map(fields) => Value::MapValue(MapValue {
            fields: Some(encode_fields(fields)),
        }),
    }
}

/// Encode a field map into the wire field map of a document.
pub fn encode_fields(fields: &Fields) -> HashMap<String, Value> {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), encode(v)))
        .collect()
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode a wire value into a native value.
///
/// Arrays and maps are decoded recursively over every variant.
pub fn decode(value: &Value) -> NativeValue {
    match value {
        Value::NullValue(()) => NativeValue::Null,
        Value::BooleanValue(b) => NativeValue::Bool(*b),
        Value::IntegerValue(s) => s
            .parse::<i64>()
            .map(NativeValue::Integer)
            .unwrap_or_else(|_| NativeValue::String(s.clone())),
        Value::DoubleValue(f) => NativeValue::Double(*f),
        Value::TimestampValue(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| NativeValue::Timestamp(dt.with_timezone(&Utc)))
            .unwrap_or_else(|_| NativeValue::String(s.clone())),
        Value::StringValue(s) => NativeValue::String(s.clone()),
        Value::BytesValue(b) => NativeValue::String(b.clone()),
        Value::ReferenceValue(r) => NativeValue::String(r.clone()),
        Value::GeoPointValue(point) => NativeValue::Map(Fields::from([
            ("latitude".to_string(), NativeValue::Double(point.latitude)),
            ("longitude".to_string(), NativeValue::Double(point.longitude)),
        ])),
        Value::ArrayValue(array) => NativeValue::Array(
            array
                .values
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(decode)
                .collect(),
        ),
        Value::MapValue(map) => NativeValue::Map(
            map.fields
                .as_ref()
                .map(decode_fields)
                .unwrap_or_default(),
        ),
    }
}

/// Decode the wire field map of a document.
pub fn decode_fields(fields: &HashMap<String, Value>) -> Fields {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), decode(v)))
        .collect()
}

/// Raw bytes as the wire expects them (base64).
pub fn encode_bytes(bytes: &[u8]) -> Value {
    Value::BytesValue(STANDARD.encode(bytes))
}
