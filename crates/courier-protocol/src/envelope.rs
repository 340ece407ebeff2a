// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `{body, meta, request_id}` envelope wrapped around every message.

use courier_core::transport::MessageMeta;
use courier_core::value::{take_required, Map, Value, ValueError};

/// One queued message: a request id, routing metadata, and a body map.
///
/// Request envelopes carry `reply_to` in their meta unless the caller
/// suppressed the response; response envelopes never do.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Correlates a response to the request it answers.
    pub request_id: u64,
    /// Routing metadata (`reply_to`, absolute expiry).
    pub meta: MessageMeta,
    /// The job request or job response map.
    pub body: Value,
}

impl Envelope {
    /// Create an envelope.
    #[must_use]
    pub fn new(request_id: u64, meta: MessageMeta, body: Value) -> Self {
        Self {
            request_id,
            meta,
            body,
        }
    }

    /// Serialize to the canonical wire map `{body, meta, request_id}`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut m = Map::new();
        m.insert("body".into(), self.body.clone());
        m.insert("meta".into(), self.meta.to_value());
        m.insert("request_id".into(), Value::Int(self.request_id as i64));
        Value::Map(m)
    }

    /// Parse from the canonical wire map.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError`] when `request_id` or `body` is missing or
    /// malformed.
    pub fn from_value(value: Value) -> Result<Self, ValueError> {
        let mut m = value.into_map()?;
        let request_id = take_required(&mut m, "request_id")?
            .as_i64()
            .ok_or(ValueError::WrongType {
                expected: "int",
                actual: "non-int request_id",
            })?
            .max(0) as u64;
        let meta = match m.remove("meta") {
            Some(v) => MessageMeta::from_value(v)?,
            None => MessageMeta::default(),
        };
        let body = take_required(&mut m, "body")?;
        Ok(Self {
            request_id,
            meta,
            body,
        })
    }
}
