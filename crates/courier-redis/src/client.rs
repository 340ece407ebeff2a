// SPDX-License-Identifier: MIT OR Apache-2.0
//! The client-side Redis transport: requests out to a service's ingress
//! list, responses in from this client's unique reply-to list.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::transport::{unix_now, MessageMeta, ReceivedResponse};
use courier_core::{ClientTransport, JobRequest, JobResponse, ReceiveError, SendError};
use courier_protocol::{frame, Envelope, FrameHeaders, ProtocolVersion};
use uuid::Uuid;

use crate::backend::ListOps;
use crate::gateway::{ingress_key, reply_key, RedisGateway};
use crate::settings::RedisTransportSettings;

/// Client transport for one service over the Redis Gateway.
///
/// Each instance owns an ephemeral reply-to queue keyed by a fresh
/// UUID, so many clients can talk to the same service without sharing
/// response queues.
pub struct RedisClientTransport {
    service_name: String,
    reply_to: String,
    gateway: RedisGateway,
}

impl RedisClientTransport {
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
        let client_id = Uuid::new_v4().simple().to_string();
        let reply_to = reply_key(&service_name, &client_id);
        Ok(Self {
            service_name,
            reply_to,
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

    /// The service this transport sends to.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The reply-to queue this transport awaits responses on.
    #[must_use]
    pub fn reply_queue(&self) -> &str {
        &self.reply_to
    }
}

#[async_trait]
impl ClientTransport for RedisClientTransport {
    async fn send_request_message(
        &self,
        request_id: u64,
        mut meta: MessageMeta,
        body: &JobRequest,
    ) -> Result<(), SendError> {
        let settings = self.gateway.settings();

        // A suppressed response means no reply-to key is ever named.
        meta.reply_to = if body.control.suppress_response {
            None
        } else {
            Some(self.reply_to.clone())
        };
        if meta.expiry.is_none() {
            meta.expiry = Some(unix_now() + settings.message_expiry);
        }
        let expiry_seconds = meta
            .seconds_until_expiry()
            .unwrap_or(settings.message_expiry);

        let version = ProtocolVersion::from_number(u64::from(settings.protocol_version))
            .map_err(|e| SendError::Other(e.to_string()))?;
        let envelope = Envelope::new(request_id, meta, body.to_value());
        let payload = self.gateway.encode_envelope(&envelope)?;
        self.gateway.check_size(payload.len())?;

        let headers = if version.supports_headers() {
            FrameHeaders::for_content_type(self.gateway.serializer().content_type())
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
            "sending job request"
        );
        self.gateway
            .push_guarded(&ingress_key(&self.service_name), framed, expiry_seconds)
            .await
    }

    async fn receive_response_message(
        &self,
        timeout: Duration,
    ) -> Result<Option<ReceivedResponse>, ReceiveError> {
        let received = match self.gateway.receive_envelope(&self.reply_to, timeout).await? {
            None => return Ok(None),
            Some(r) => r,
        };
        let mut meta = received.envelope.meta;
        meta.protocol_version = Some(received.version.as_u8());
        meta.content_type = received.content_type;
        let body = JobResponse::from_value(received.envelope.body)
            .map_err(|e| ReceiveError::InvalidMessage(e.to_string()))?;
        tracing::debug!(
            target: "courier.transport",
            service = %self.service_name,
            request_id = received.envelope.request_id,
            "received job response"
        );
        Ok(Some(ReceivedResponse {
            request_id: received.envelope.request_id,
            meta,
            body,
        }))
    }
}
