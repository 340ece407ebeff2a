// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transport seams between the engines and the broker.
//!
//! A client transport sends job requests and receives job responses on a
//! client-unique reply-to queue; a server transport receives job requests
//! for one service and sends responses to the reply-to queue each request
//! names. Implementations own their broker connections; the engines only
//! ever see these traits.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::errors::{ReceiveError, SendError};
use crate::model::{JobRequest, JobResponse};
use crate::value::{Map, Value, ValueError};

/// Key under which a message's absolute expiry rides in the meta map.
pub const META_EXPIRY: &str = "__expiry__";
/// Key under which a request's reply-to queue rides in the meta map.
pub const META_REPLY_TO: &str = "reply_to";

// ---------------------------------------------------------------------------
// MessageMeta
// ---------------------------------------------------------------------------

/// Out-of-band message metadata.
///
/// `reply_to` and `expiry` travel on the wire inside the envelope's meta
/// map; `protocol_version` and `content_type` are frame-level facts the
/// receiving transport records so a response can be framed the way the
/// requester understands.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageMeta {
    /// The client-unique queue the response must be enqueued on.
    /// Present on requests unless the response is suppressed; never
    /// present on responses.
    pub reply_to: Option<String>,
    /// Absolute expiry, seconds since the Unix epoch.
    pub expiry: Option<u64>,
    /// Wire protocol version the peer's frame advertised.
    pub protocol_version: Option<u8>,
    /// Content type the peer's frame advertised.
    pub content_type: Option<String>,
    /// Additional meta keys, preserved verbatim.
    pub extra: Map,
}

impl MessageMeta {
    /// Seconds remaining until `expiry`, clamped to at least 1; `None`
    /// when no expiry is set.
    #[must_use]
    pub fn seconds_until_expiry(&self) -> Option<u64> {
        self.expiry.map(|e| e.saturating_sub(unix_now()).max(1))
    }

    /// `true` when the message's expiry has already passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        matches!(self.expiry, Some(e) if e < unix_now())
    }

    /// Serialize the wire-visible portion to the envelope meta map.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut m = self.extra.clone();
        if let Some(reply_to) = &self.reply_to {
            m.insert(META_REPLY_TO.into(), Value::from(reply_to.as_str()));
        }
        if let Some(expiry) = self.expiry {
            m.insert(META_EXPIRY.into(), Value::Int(expiry as i64));
        }
        Value::Map(m)
    }

    /// Parse the wire-visible portion from an envelope meta map.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError`] when the value is not a map or a known key
    /// has the wrong type.
    pub fn from_value(value: Value) -> Result<Self, ValueError> {
        let mut m = value.into_map()?;
        let reply_to = match m.remove(META_REPLY_TO) {
            Some(Value::Null) | None => None,
            Some(v) => Some(v.into_string()?),
        };
        let expiry = m
            .remove(META_EXPIRY)
            .and_then(|v| v.as_i64())
            .map(|e| e.max(0) as u64);
        Ok(Self {
            reply_to,
            expiry,
            protocol_version: None,
            content_type: None,
            extra: m,
        })
    }
}

/// Current time as seconds since the Unix epoch.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Received messages
// ---------------------------------------------------------------------------

/// A job request dequeued by a server transport.
///
/// The body is left as a raw value map so the server engine can answer a
/// malformed job with a job-level error instead of dropping it.
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    /// The request id the response must echo.
    pub request_id: u64,
    /// Message metadata, including the reply-to queue.
    pub meta: MessageMeta,
    /// The raw job request map.
    pub body: Value,
}

/// A job response dequeued by a client transport.
#[derive(Debug, Clone)]
pub struct ReceivedResponse {
    /// The request id this response answers.
    pub request_id: u64,
    /// Message metadata.
    pub meta: MessageMeta,
    /// The parsed job response.
    pub body: JobResponse,
}

// ---------------------------------------------------------------------------
// Transport traits
// ---------------------------------------------------------------------------

/// Client-side transport: request out, response in.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Enqueue a job request for the transport's service.
    ///
    /// `meta.expiry` bounds how long the broker may hold the message;
    /// `meta.reply_to` is filled in by the transport unless the caller
    /// suppressed the response.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] on serialization failure, a full or
    /// unreachable queue, or an oversized message.
    async fn send_request_message(
        &self,
        request_id: u64,
        meta: MessageMeta,
        body: &JobRequest,
    ) -> Result<(), SendError>;

    /// Dequeue the next job response from this client's reply-to queue,
    /// waiting up to `timeout`. Returns `Ok(None)` when the wait elapsed
    /// with no message.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiveError`] on connection failure, corrupt frames,
    /// or a chunk-ordering violation.
    async fn receive_response_message(
        &self,
        timeout: Duration,
    ) -> Result<Option<ReceivedResponse>, ReceiveError>;
}

/// Server-side transport: request in, response out.
#[async_trait]
pub trait ServerTransport: Send + Sync {
    /// Dequeue the next job request from the service's ingress queue,
    /// waiting up to `timeout`. Returns `Ok(None)` when the wait elapsed
    /// with no message. Expired messages are discarded internally and
    /// never surfaced.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiveError`] on connection failure or corrupt frames.
    async fn receive_request_message(
        &self,
        timeout: Duration,
    ) -> Result<Option<ReceivedRequest>, ReceiveError>;

    /// Enqueue a job response on the reply-to queue named by `meta`.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Other`] when `meta` names no reply-to queue,
    /// or any other [`SendError`] from the underlying broker.
    async fn send_response_message(
        &self,
        request_id: u64,
        meta: &MessageMeta,
        body: &JobResponse,
    ) -> Result<(), SendError>;
}
