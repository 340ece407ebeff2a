// SPDX-License-Identifier: MIT OR Apache-2.0
//! The self-describing value tree that message bodies are built from.
//!
//! [`Value`] covers the JSON-like primitives (null, bool, 64-bit signed
//! integer, IEEE-754 double, string, list, string-keyed map) plus the
//! extension types the wire encodings must round-trip: UTC datetime with
//! microsecond precision, date, time, arbitrary-precision decimal, a
//! fixed-precision currency amount, and raw bytes.

use std::collections::BTreeMap;
use std::fmt;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use thiserror::Error;

/// A string-keyed map of values; the shape of every message body.
pub type Map = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// CurrencyAmount
// ---------------------------------------------------------------------------

/// A fixed-precision amount of money: an ISO-4217 currency code plus an
/// integer count of the currency's minor unit (cents, pence, …).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CurrencyAmount {
    /// Three-letter ISO-4217 currency code, e.g. `"USD"`.
    pub code: String,
    /// Amount in the currency's minor unit.
    pub minor: i64,
}

impl CurrencyAmount {
    /// Create a new amount.
    pub fn new(code: impl Into<String>, minor: i64) -> Self {
        Self {
            code: code.into(),
            minor,
        }
    }
}

impl fmt::Display for CurrencyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.minor)
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A single node in a message body.
///
/// Equality is structural. String values are carried verbatim; no encoding
/// layer may trim or normalise whitespace in them.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent / null.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// IEEE-754 double.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// UTC datetime with microsecond precision.
    Datetime(DateTime<Utc>),
    /// Calendar date.
    Date(NaiveDate),
    /// Wall-clock time with microsecond precision.
    Time(NaiveTime),
    /// Arbitrary-precision decimal, string-backed on the wire.
    Decimal(BigDecimal),
    /// Fixed-precision currency amount.
    Currency(CurrencyAmount),
    /// Ordered list.
    List(Vec<Value>),
    /// String-keyed map.
    Map(Map),
}

impl Value {
    /// An empty map value.
    #[must_use]
    pub fn map() -> Self {
        Value::Map(Map::new())
    }

    /// Short lowercase name of this value's type, for error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Datetime(_) => "datetime",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Decimal(_) => "decimal",
            Value::Currency(_) => "currency",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow as a string, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as an integer, if this is an integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Borrow as a bool, if this is a bool.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Borrow as a float, if this is a float.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Borrow as a list, if this is a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Borrow as a map, if this is a map.
    #[must_use]
    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Mutably borrow as a map, if this is a map.
    pub fn as_map_mut(&mut self) -> Option<&mut Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a key, if this is a map.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Consume into a map, or report the actual type.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::WrongType`] if this is not a map.
    pub fn into_map(self) -> Result<Map, ValueError> {
        match self {
            Value::Map(m) => Ok(m),
            other => Err(ValueError::WrongType {
                expected: "map",
                actual: other.type_name(),
            }),
        }
    }

    /// Consume into a list, or report the actual type.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::WrongType`] if this is not a list.
    pub fn into_list(self) -> Result<Vec<Value>, ValueError> {
        match self {
            Value::List(l) => Ok(l),
            other => Err(ValueError::WrongType {
                expected: "list",
                actual: other.type_name(),
            }),
        }
    }

    /// Consume into a string, or report the actual type.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::WrongType`] if this is not a string.
    pub fn into_string(self) -> Result<String, ValueError> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(ValueError::WrongType {
                expected: "string",
                actual: other.type_name(),
            }),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<Map> for Value {
    fn from(v: Map) -> Self {
        Value::Map(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Datetime(v)
    }
}

impl From<CurrencyAmount> for Value {
    fn from(v: CurrencyAmount) -> Self {
        Value::Currency(v)
    }
}

impl From<BigDecimal> for Value {
    fn from(v: BigDecimal) -> Self {
        Value::Decimal(v)
    }
}

// ---------------------------------------------------------------------------
// ValueError
// ---------------------------------------------------------------------------

/// Structural errors raised when reading model types out of a [`Value`] tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    /// A required key was absent.
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    /// A node had a different type than the model requires.
    #[error("expected {expected}, got {actual}")]
    WrongType {
        /// The type the model requires.
        expected: &'static str,
        /// The type actually present.
        actual: &'static str,
    },

    /// A field value was present and well-typed but semantically invalid.
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue {
        /// The offending field name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Read a required key out of a map, with a precise error.
///
/// # Errors
///
/// Returns [`ValueError::MissingField`] when `key` is absent.
pub fn take_required(map: &mut Map, key: &'static str) -> Result<Value, ValueError> {
    map.remove(key).ok_or(ValueError::MissingField(key))
}
