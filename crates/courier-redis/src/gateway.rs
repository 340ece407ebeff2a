// SPDX-License-Identifier: MIT OR Apache-2.0
//! The gateway core shared by both transport directions: key naming,
//! guarded sends, and receive-with-reassembly.

use std::sync::Arc;
use std::time::Duration;

use courier_core::transport::unix_now;
use courier_core::{ReceiveError, SendError};
use courier_protocol::{ChunkAssembler, Envelope, Frame, FrameError, ProtocolVersion};
use courier_serde::{serializer_for_content_type, Serializer};
use rand::Rng;
use tokio::time::Instant;

use crate::backend::{push_with_expiry, ListOps, RedisOpError};
use crate::settings::RedisTransportSettings;

/// The ingress list every server worker for a service pops from.
#[must_use]
pub fn ingress_key(service: &str) -> String {
    format!("service:{service}")
}

/// The client-unique reply-to list a specific client awaits responses on.
#[must_use]
pub fn reply_key(service: &str, client_id: &str) -> String {
    format!("service:{service}.{client_id}!")
}

/// A fully reassembled and decoded inbound envelope, together with the
/// frame-level facts needed to answer the peer in kind.
#[derive(Debug)]
pub struct ReceivedEnvelope {
    /// The decoded envelope.
    pub envelope: Envelope,
    /// Protocol version the sender framed with.
    pub version: ProtocolVersion,
    /// Content type the sender named, when the frame carried one.
    pub content_type: Option<String>,
}

/// Queue discipline shared by the client and server transports.
pub struct RedisGateway {
    backend: Arc<dyn ListOps>,
    serializer: Arc<dyn Serializer>,
    settings: RedisTransportSettings,
}

impl RedisGateway {
    /// Build a gateway over a connected backend.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Serialization`] when the configured content
    /// type names no registered serializer.
    pub fn new(
        backend: Arc<dyn ListOps>,
        settings: RedisTransportSettings,
    ) -> Result<Self, SendError> {
        let serializer =
            serializer_for_content_type(&settings.content_type).ok_or_else(|| {
                SendError::Serialization(format!(
                    "no serializer registered for '{}'",
                    settings.content_type
                ))
            })?;
        Ok(Self {
            backend,
            serializer,
            settings,
        })
    }

    /// The gateway's settings.
    #[must_use]
    pub fn settings(&self) -> &RedisTransportSettings {
        &self.settings
    }

    /// The configured default body serializer.
    #[must_use]
    pub fn serializer(&self) -> Arc<dyn Serializer> {
        Arc::clone(&self.serializer)
    }

    /// The underlying backend, for direct list operations.
    #[must_use]
    pub fn backend(&self) -> Arc<dyn ListOps> {
        Arc::clone(&self.backend)
    }

    // -- send ---------------------------------------------------------------

    /// Serialize an envelope with the gateway's default serializer.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Serialization`] when the body is not
    /// encodable.
    pub fn encode_envelope(&self, envelope: &Envelope) -> Result<Vec<u8>, SendError> {
        self.serializer
            .encode(&envelope.to_value())
            .map_err(|e| SendError::Serialization(e.to_string()))
    }

    /// Enforce the hard size cap and emit the large-message warning.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::TooLarge`] above the cap; this happens
    /// before any broker call.
    pub fn check_size(&self, size: usize) -> Result<(), SendError> {
        let limit = self.settings.maximum_message_size_in_bytes;
        if size > limit {
            return Err(SendError::TooLarge { size, limit });
        }
        let warn_at = self.settings.log_messages_larger_than_bytes;
        if warn_at > 0 && size > warn_at {
            tracing::warn!(
                target: "courier.transport",
                size,
                threshold = warn_at,
                "sending unusually large message"
            );
        }
        Ok(())
    }

    /// Enqueue one framed message, retrying while the queue is full.
    ///
    /// Each attempt checks `LLEN` against the capacity; a successful
    /// attempt is `RPUSH` followed by `EXPIRE` so a crashed consumer
    /// cannot leak state.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::QueueFull`] once the retries are exhausted,
    /// or [`SendError::Connection`] on broker failure.
    pub async fn push_guarded(
        &self,
        key: &str,
        framed: Vec<u8>,
        expiry_seconds: u64,
    ) -> Result<(), SendError> {
        let retries = self.settings.queue_full_retries;
        for attempt in 0..=retries {
            let len = self.backend.llen(key).await.map_err(op_to_send)?;
            if len < self.settings.queue_capacity {
                push_with_expiry(self.backend.as_ref(), key, framed, expiry_seconds)
                    .await
                    .map_err(op_to_send)?;
                return Ok(());
            }
            tracing::debug!(
                target: "courier.transport",
                queue = key,
                attempt,
                "queue full, backing off"
            );
            if attempt < retries {
                tokio::time::sleep(queue_full_backoff(attempt)).await;
            }
        }
        Err(SendError::QueueFull {
            queue: key.to_owned(),
            attempts: retries + 1,
        })
    }

    // -- receive ------------------------------------------------------------

    /// Pop and unframe one message, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiveError`] on broker failure or a malformed frame.
    pub async fn pop_frame(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<Frame>, ReceiveError> {
        let raw = self
            .backend
            .blpop(key, timeout)
            .await
            .map_err(op_to_receive)?;
        match raw {
            None => Ok(None),
            Some(bytes) => {
                let frame = courier_protocol::unframe(&bytes).map_err(frame_to_receive)?;
                Ok(Some(frame))
            }
        }
    }

    /// Receive one complete envelope, reassembling chunks and discarding
    /// expired messages, within an overall `timeout`.
    ///
    /// Returns `Ok(None)` when the wait elapsed with no complete,
    /// unexpired message.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiveError::ChunkGap`] on any chunk-ordering
    /// violation (including a chunk that never arrives within the
    /// configured chunk wait window), or other [`ReceiveError`]s on
    /// broker or decode failure.
    pub async fn receive_envelope(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<ReceivedEnvelope>, ReceiveError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let first = match self.pop_frame(key, remaining).await? {
                None => return Ok(None),
                Some(frame) => frame,
            };
            let version = first.version;
            let content_type = first.headers.content_type.clone();

            let mut assembler = ChunkAssembler::new();
            let mut payload = assembler.push(&first).map_err(frame_to_receive)?;
            while payload.is_none() {
                let wait = Duration::from_secs(self.settings.chunk_wait_timeout);
                let next = self.pop_frame(key, wait).await?.ok_or_else(|| {
                    ReceiveError::ChunkGap {
                        reason: format!("next chunk did not arrive within {wait:?}"),
                    }
                })?;
                payload = assembler.push(&next).map_err(frame_to_receive)?;
            }
            let payload = payload.unwrap_or_default();

            let serializer = match &content_type {
                Some(ct) => serializer_for_content_type(ct).ok_or_else(|| {
                    ReceiveError::InvalidMessage(format!("unsupported content type '{ct}'"))
                })?,
                None => Arc::clone(&self.serializer),
            };
            let value = serializer
                .decode(&payload)
                .map_err(|e| ReceiveError::Deserialization(e.to_string()))?;
            let envelope = Envelope::from_value(value)
                .map_err(|e| ReceiveError::InvalidMessage(e.to_string()))?;

            if envelope.meta.is_expired() {
                tracing::info!(
                    target: "courier.transport",
                    request_id = envelope.request_id,
                    queue = key,
                    now = unix_now(),
                    "discarding expired message"
                );
                continue;
            }
            return Ok(Some(ReceivedEnvelope {
                envelope,
                version,
                content_type,
            }));
        }
    }
}

fn queue_full_backoff(attempt: u32) -> Duration {
    let base = 25 * u64::from(1_u32 << attempt.min(4));
    let jitter = rand::thread_rng().gen_range(0..25);
    Duration::from_millis(base + jitter)
}

fn op_to_send(e: RedisOpError) -> SendError {
    match e {
        RedisOpError::Connection(msg) => SendError::Connection(msg),
        RedisOpError::Response(msg) => SendError::Other(msg),
    }
}

fn op_to_receive(e: RedisOpError) -> ReceiveError {
    match e {
        RedisOpError::Connection(msg) => ReceiveError::Connection(msg),
        RedisOpError::Response(msg) => ReceiveError::Other(msg),
    }
}

fn frame_to_receive(e: FrameError) -> ReceiveError {
    match e {
        FrameError::ChunkGap { reason } => ReceiveError::ChunkGap { reason },
        other => ReceiveError::InvalidMessage(other.to_string()),
    }
}
