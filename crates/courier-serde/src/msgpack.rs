// SPDX-License-Identifier: MIT OR Apache-2.0
//! The binary packed encoding: MessagePack with application ext types.
//!
//! Primitives map onto MessagePack's native types (strings, 64-bit
//! integers, doubles, booleans, nil, bin, arrays, string-keyed maps).
//! The extension types ride as MessagePack ext values:
//!
//! | ext | type | payload |
//! |---|---|---|
//! | 1 | datetime | 8-byte big-endian microseconds since the Unix epoch |
//! | 2 | date | `YYYY-MM-DD` UTF-8 |
//! | 3 | time | `HH:MM:SS.ffffff` UTF-8 |
//! | 4 | decimal | UTF-8 decimal digits |
//! | 5 | currency | 3-byte currency code + 8-byte big-endian minor units |

use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime};
use courier_core::value::{CurrencyAmount, Map, Value};

use crate::{DeserializationError, SerializationError, Serializer, CONTENT_TYPE_MSGPACK};

const EXT_DATETIME: i8 = 1;
const EXT_DATE: i8 = 2;
const EXT_TIME: i8 = 3;
const EXT_DECIMAL: i8 = 4;
const EXT_CURRENCY: i8 = 5;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.6f";

/// MessagePack serializer; the preferred wire encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgpackSerializer;

impl Serializer for MsgpackSerializer {
    fn content_type(&self) -> &'static str {
        CONTENT_TYPE_MSGPACK
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, SerializationError> {
        if !matches!(value, Value::Map(_)) {
            return Err(SerializationError::TopLevelNotMap(value.type_name()));
        }
        let packed = to_rmpv(value)?;
        let mut out = Vec::new();
        rmpv::encode::write_value(&mut out, &packed)
            .map_err(|e| SerializationError::Io(e.to_string()))?;
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, DeserializationError> {
        let mut cursor = bytes;
        let packed = rmpv::decode::read_value(&mut cursor)
            .map_err(|e| DeserializationError::Corrupt(e.to_string()))?;
        let value = from_rmpv(packed)?;
        if !matches!(value, Value::Map(_)) {
            return Err(DeserializationError::TopLevelNotMap);
        }
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn to_rmpv(value: &Value) -> Result<rmpv::Value, SerializationError> {
    Ok(match value {
        Value::Null => rmpv::Value::Nil,
        Value::Bool(b) => rmpv::Value::Boolean(*b),
        Value::Int(i) => rmpv::Value::Integer((*i).into()),
        Value::Float(f) => rmpv::Value::F64(*f),
        Value::String(s) => rmpv::Value::String(s.as_str().into()),
        Value::Bytes(b) => rmpv::Value::Binary(b.clone()),
        Value::Datetime(dt) => {
            rmpv::Value::Ext(EXT_DATETIME, dt.timestamp_micros().to_be_bytes().to_vec())
        }
        Value::Date(d) => {
            rmpv::Value::Ext(EXT_DATE, d.format(DATE_FORMAT).to_string().into_bytes())
        }
        Value::Time(t) => {
            rmpv::Value::Ext(EXT_TIME, t.format(TIME_FORMAT).to_string().into_bytes())
        }
        Value::Decimal(d) => rmpv::Value::Ext(EXT_DECIMAL, d.to_string().into_bytes()),
        Value::Currency(c) => {
            if c.code.len() != 3 || !c.code.is_ascii() {
                return Err(SerializationError::BadCurrencyCode(c.code.clone()));
            }
            let mut payload = Vec::with_capacity(11);
            payload.extend_from_slice(c.code.as_bytes());
            payload.extend_from_slice(&c.minor.to_be_bytes());
            rmpv::Value::Ext(EXT_CURRENCY, payload)
        }
        Value::List(items) => rmpv::Value::Array(
            items.iter().map(to_rmpv).collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Map(entries) => rmpv::Value::Map(
            entries
                .iter()
                .map(|(k, v)| Ok((rmpv::Value::String(k.as_str().into()), to_rmpv(v)?)))
                .collect::<Result<Vec<_>, SerializationError>>()?,
        ),
    })
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn from_rmpv(value: rmpv::Value) -> Result<Value, DeserializationError> {
    Ok(match value {
        rmpv::Value::Nil => Value::Null,
        rmpv::Value::Boolean(b) => Value::Bool(b),
        rmpv::Value::Integer(i) => {
            Value::Int(i.as_i64().ok_or(DeserializationError::IntOutOfRange)?)
        }
        rmpv::Value::F32(f) => Value::Float(f64::from(f)),
        rmpv::Value::F64(f) => Value::Float(f),
        rmpv::Value::String(s) => Value::String(
            s.into_str()
                .ok_or_else(|| DeserializationError::Corrupt("non-UTF-8 string".into()))?,
        ),
        rmpv::Value::Binary(b) => Value::Bytes(b),
        rmpv::Value::Ext(code, payload) => decode_ext(code, &payload)?,
        rmpv::Value::Array(items) => Value::List(
            items
                .into_iter()
                .map(from_rmpv)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        rmpv::Value::Map(entries) => {
            let mut map = Map::new();
            for (k, v) in entries {
                let key = match k {
                    rmpv::Value::String(s) => s
                        .into_str()
                        .ok_or_else(|| DeserializationError::Corrupt("non-UTF-8 key".into()))?,
                    _ => return Err(DeserializationError::NonStringKey),
                };
                map.insert(key, from_rmpv(v)?);
            }
            Value::Map(map)
        }
    })
}

fn decode_ext(code: i8, payload: &[u8]) -> Result<Value, DeserializationError> {
    match code {
        EXT_DATETIME => {
            let bytes: [u8; 8] =
                payload
                    .try_into()
                    .map_err(|_| DeserializationError::MalformedExtension {
                        kind: "datetime",
                        reason: format!("payload is {} bytes, expected 8", payload.len()),
                    })?;
            let micros = i64::from_be_bytes(bytes);
            DateTime::from_timestamp_micros(micros)
                .map(Value::Datetime)
                .ok_or(DeserializationError::MalformedExtension {
                    kind: "datetime",
                    reason: format!("microsecond timestamp {micros} out of range"),
                })
        }
        EXT_DATE => {
            let s = ext_str("date", payload)?;
            NaiveDate::parse_from_str(s, DATE_FORMAT)
                .map(Value::Date)
                .map_err(|e| DeserializationError::MalformedExtension {
                    kind: "date",
                    reason: e.to_string(),
                })
        }
        EXT_TIME => {
            let s = ext_str("time", payload)?;
            NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
                .map(Value::Time)
                .map_err(|e| DeserializationError::MalformedExtension {
                    kind: "time",
                    reason: e.to_string(),
                })
        }
        EXT_DECIMAL => {
            let s = ext_str("decimal", payload)?;
            BigDecimal::from_str(s).map(Value::Decimal).map_err(|e| {
                DeserializationError::MalformedExtension {
                    kind: "decimal",
                    reason: e.to_string(),
                }
            })
        }
        EXT_CURRENCY => {
            if payload.len() != 11 {
                return Err(DeserializationError::MalformedExtension {
                    kind: "currency",
                    reason: format!("payload is {} bytes, expected 11", payload.len()),
                });
            }
            let code = std::str::from_utf8(&payload[..3])
                .map_err(|_| DeserializationError::MalformedExtension {
                    kind: "currency",
                    reason: "non-UTF-8 currency code".into(),
                })?
                .to_owned();
            let mut minor_bytes = [0u8; 8];
            minor_bytes.copy_from_slice(&payload[3..]);
            Ok(Value::Currency(CurrencyAmount {
                code,
                minor: i64::from_be_bytes(minor_bytes),
            }))
        }
        other => Err(DeserializationError::UnknownExtension(other)),
    }
}

fn ext_str<'a>(kind: &'static str, payload: &'a [u8]) -> Result<&'a str, DeserializationError> {
    std::str::from_utf8(payload).map_err(|_| DeserializationError::MalformedExtension {
        kind,
        reason: "payload is not UTF-8".into(),
    })
}
