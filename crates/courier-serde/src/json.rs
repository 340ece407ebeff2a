// SPDX-License-Identifier: MIT OR Apache-2.0
//! The textual encoding: JSON with sentinel-wrapped extension types.
//!
//! JSON has no native representation for the extension types, so each is
//! carried as a single-key object whose key is reserved by the encoding:
//! `{"__datetime__": "2024-05-01T12:00:00.000123Z"}`,
//! `{"__date__": "2024-05-01"}`, `{"__time__": "12:00:00.000123"}`,
//! `{"__decimal__": "3.1400"}`,
//! `{"__currency__": {"code": "USD", "minor": 1299}}`, and
//! `{"__bytes__": "<base64>"}`. A genuine map that uses one of these keys
//! is rejected at encode time rather than decoded back as the wrong type.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use courier_core::value::{CurrencyAmount, Map, Value};
use serde_json::{json, Number};

use crate::{DeserializationError, SerializationError, Serializer, CONTENT_TYPE_JSON};

const KEY_DATETIME: &str = "__datetime__";
const KEY_DATE: &str = "__date__";
const KEY_TIME: &str = "__time__";
const KEY_DECIMAL: &str = "__decimal__";
const KEY_CURRENCY: &str = "__currency__";
const KEY_BYTES: &str = "__bytes__";

const SENTINEL_KEYS: &[&str] = &[
    KEY_DATETIME,
    KEY_DATE,
    KEY_TIME,
    KEY_DECIMAL,
    KEY_CURRENCY,
    KEY_BYTES,
];

/// JSON serializer; the textual wire encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn content_type(&self) -> &'static str {
        CONTENT_TYPE_JSON
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, SerializationError> {
        if !matches!(value, Value::Map(_)) {
            return Err(SerializationError::TopLevelNotMap(value.type_name()));
        }
        let json = to_json(value)?;
        serde_json::to_vec(&json).map_err(|e| SerializationError::Io(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, DeserializationError> {
        let json: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| DeserializationError::Corrupt(e.to_string()))?;
        let value = from_json(json)?;
        if !matches!(value, Value::Map(_)) {
            return Err(DeserializationError::TopLevelNotMap);
        }
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn to_json(value: &Value) -> Result<serde_json::Value, SerializationError> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::Number((*i).into()),
        Value::Float(f) => serde_json::Value::Number(
            Number::from_f64(*f)
                .ok_or_else(|| SerializationError::Unencodable(format!("float {f}")))?,
        ),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => json!({ KEY_BYTES: base64::encode(b) }),
        Value::Datetime(dt) => {
            json!({ KEY_DATETIME: dt.to_rfc3339_opts(SecondsFormat::Micros, true) })
        }
        Value::Date(d) => json!({ KEY_DATE: d.format("%Y-%m-%d").to_string() }),
        Value::Time(t) => json!({ KEY_TIME: t.format("%H:%M:%S%.6f").to_string() }),
        Value::Decimal(d) => json!({ KEY_DECIMAL: d.to_string() }),
        Value::Currency(c) => {
            json!({ KEY_CURRENCY: { "code": c.code, "minor": c.minor } })
        }
        Value::List(items) => serde_json::Value::Array(
            items.iter().map(to_json).collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Map(entries) => {
            for reserved in SENTINEL_KEYS {
                if entries.contains_key(*reserved) {
                    return Err(SerializationError::ReservedKey((*reserved).to_owned()));
                }
            }
            serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), to_json(v)?)))
                    .collect::<Result<serde_json::Map<_, _>, SerializationError>>()?,
            )
        }
    })
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn from_json(value: serde_json::Value) -> Result<Value, DeserializationError> {
    Ok(match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                return Err(DeserializationError::IntOutOfRange);
            }
        }
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => Value::List(
            items
                .into_iter()
                .map(from_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        serde_json::Value::Object(obj) => {
            if obj.len() == 1 {
                let key = obj.keys().next().cloned().unwrap_or_default();
                if SENTINEL_KEYS.contains(&key.as_str()) {
                    let mut obj = obj;
                    let inner = obj.remove(&key).unwrap_or(serde_json::Value::Null);
                    return decode_sentinel(&key, inner);
                }
            }
            let mut map = Map::new();
            for (k, v) in obj {
                map.insert(k, from_json(v)?);
            }
            Value::Map(map)
        }
    })
}

fn decode_sentinel(
    key: &str,
    inner: serde_json::Value,
) -> Result<Value, DeserializationError> {
    match key {
        KEY_BYTES => {
            let s = sentinel_str("bytes", inner)?;
            base64::decode(&s)
                .map(Value::Bytes)
                .map_err(|e| malformed("bytes", e.to_string()))
        }
        KEY_DATETIME => {
            let s = sentinel_str("datetime", inner)?;
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| Value::Datetime(dt.with_timezone(&Utc)))
                .map_err(|e| malformed("datetime", e.to_string()))
        }
        KEY_DATE => {
            let s = sentinel_str("date", inner)?;
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|e| malformed("date", e.to_string()))
        }
        KEY_TIME => {
            let s = sentinel_str("time", inner)?;
            NaiveTime::parse_from_str(&s, "%H:%M:%S%.f")
                .map(Value::Time)
                .map_err(|e| malformed("time", e.to_string()))
        }
        KEY_DECIMAL => {
            let s = sentinel_str("decimal", inner)?;
            BigDecimal::from_str(&s)
                .map(Value::Decimal)
                .map_err(|e| malformed("decimal", e.to_string()))
        }
        KEY_CURRENCY => {
            let obj = match inner {
                serde_json::Value::Object(o) => o,
                _ => return Err(malformed("currency", "expected an object".into())),
            };
            let code = obj
                .get("code")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| malformed("currency", "missing 'code'".into()))?
                .to_owned();
            let minor = obj
                .get("minor")
                .and_then(serde_json::Value::as_i64)
                .ok_or_else(|| malformed("currency", "missing 'minor'".into()))?;
            Ok(Value::Currency(CurrencyAmount { code, minor }))
        }
        _ => Err(malformed("sentinel", format!("unexpected key '{key}'"))),
    }
}

fn sentinel_str(
    kind: &'static str,
    inner: serde_json::Value,
) -> Result<String, DeserializationError> {
    match inner {
        serde_json::Value::String(s) => Ok(s),
        _ => Err(malformed(kind, "expected a string payload".into())),
    }
}

fn malformed(kind: &'static str, reason: String) -> DeserializationError {
    DeserializationError::MalformedExtension { kind, reason }
}
