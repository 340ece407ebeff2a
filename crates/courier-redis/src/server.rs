// SPDX-License-Identifier: MIT OR Apache-2.0
//! The server-side Redis transport: requests in from the service's
//! ingress list, responses out to each request's reply-to list.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::transport::{unix_now, MessageMeta, ReceivedRequest};
use courier_core::{JobResponse, ReceiveError, SendError, ServerTransport};
use courier_protocol::chunks::frame_as_chunks;
use courier_protocol::{frame, Envelope, FrameHeaders, ProtocolVersion};
use courier_serde::{serializer_for_content_type, Serializer};

use crate::backend::ListOps;
use crate::gateway::{ingress_key, RedisGateway};
use crate::settings::RedisTransportSettings;

/// Server transport for one named service over the Redis Gateway.
pub struct RedisServerTransport {
    service_name: String,
    ingress: String,
    gateway: RedisGateway,
}

impl RedisServerTransport {
    /// Build a transport over an already connected backend.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Serialization`] when the configured content
    /// type names no registered serializer.
    pub fn new(
        service_name: impl Into<String>,
        backend: Arc<dyn ListOps>,
        settings: RedisTransportSettings,
    ) -> Result<Self, SendError> {
        let service_name = service_name.into();
        let ingress = ingress_key(&service_name);
        Ok(Self {
            service_name,
            ingress,
            gateway: RedisGateway::new(backend, settings)?,
        })
    }

    /// Connect the configured backend and build a transport over it.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Connection`] when the broker is unreachable.
    pub async fn connect(
        service_name: impl Into<String>,
        settings: RedisTransportSettings,
    ) -> Result<Self, SendError> {
        let backend = crate::connect_backend(&settings.backend)
            .await
            .map_err(|e| SendError::Connection(e.to_string()))?;
        Self::new(service_name, backend, settings)
    }

    /// The service this transport serves.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    fn response_serializer(&self, request_content_type: Option<&str>) -> Arc<dyn Serializer> {
        request_content_type
            .and_then(serializer_for_content_type)
            .unwrap_or_else(|| self.gateway.serializer())
    }
}

#[async_trait]
impl ServerTransport for RedisServerTransport {
    async fn receive_request_message(
        &self,
        timeout: Duration,
    ) -> Result<Option<ReceivedRequest>, ReceiveError> {
        let received = match self.gateway.receive_envelope(&self.ingress, timeout).await? {
            None => return Ok(None),
            Some(r) => r,
        };
        let mut meta = received.envelope.meta;
        meta.protocol_version = Some(received.version.as_u8());
        meta.content_type = received.content_type;
        tracing::debug!(
            target: "courier.transport",
            service = %self.service_name,
            request_id = received.envelope.request_id,
            version = received.version.as_u8(),
            "received job request"
        );
        Ok(Some(ReceivedRequest {
            request_id: received.envelope.request_id,
            meta,
            body: received.envelope.body,
        }))
    }

    async fn send_response_message(
        &self,
        request_id: u64,
        request_meta: &MessageMeta,
        body: &JobResponse,
    ) -> Result<(), SendError> {
        let reply_to = request_meta
            .reply_to
            .as_deref()
            .ok_or_else(|| SendError::Other("request named no reply-to queue".into()))?;

        // Respond the way the requester framed: same version, same
        // content type when we have a serializer for it.
        let version = request_meta
            .protocol_version
            .and_then(|v| ProtocolVersion::from_number(u64::from(v)).ok())
            .unwrap_or(ProtocolVersion::V1);
        let serializer = self.response_serializer(request_meta.content_type.as_deref());

        let settings = self.gateway.settings();
        let expiry = unix_now() + settings.message_expiry;
        let meta = MessageMeta {
            reply_to: None,
            expiry: Some(expiry),
            ..MessageMeta::default()
        };
        let envelope = Envelope::new(request_id, meta, body.to_value());
        let payload = serializer
            .encode(&envelope.to_value())
            .map_err(|e| SendError::Serialization(e.to_string()))?;

        let chunk_threshold = settings
            .chunk_messages_larger_than_bytes
            .filter(|t| *t > 0);
        let chunkable = version.supports_chunking();
        if let Some(threshold) = chunk_threshold {
            if payload.len() > threshold && chunkable {
                let frames = frame_as_chunks(
                    &payload,
                    threshold,
                    version,
                    Some(serializer.content_type()),
                )
                .map_err(|e| SendError::Other(e.to_string()))?;
                tracing::debug!(
                    target: "courier.transport",
                    service = %self.service_name,
                    request_id,
                    chunks = frames.len(),
                    bytes = payload.len(),
                    "sending chunked job response"
                );
                for framed in frames {
                    self.gateway
                        .push_guarded(reply_to, framed, settings.message_expiry)
                        .await?;
                }
                return Ok(());
            }
        }

        // Chunking is never attempted for version 1 or 2 peers; an
        // oversized response simply fails here and the engine answers
        // with an error response instead.
        self.gateway.check_size(payload.len())?;
        let headers = if version.supports_headers() {
            FrameHeaders::for_content_type(serializer.content_type())
        } else {
            FrameHeaders::default()
        };
        let framed =
            frame(&payload, version, &headers).map_err(|e| SendError::Other(e.to_string()))?;
        tracing::debug!(
            target: "courier.transport",
            service = %self.service_name,
            request_id,
            bytes = framed.len(),
            "sending job response"
        );
        self.gateway
            .push_guarded(reply_to, framed, settings.message_expiry)
            .await
    }
}
