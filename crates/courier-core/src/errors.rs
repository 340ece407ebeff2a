// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error taxonomy shared by the engines and transports.
//!
//! These are Rust-side failures — distinct from the wire-level
//! [`Error`](crate::model::Error) record that rides inside responses.
//! Serialization failures are wrapped by the transport that encountered
//! them, so callers see a single send/receive taxonomy.

use std::time::Duration;

use thiserror::Error;

use crate::model::{ActionResponse, Error as WireError};

/// Failures while enqueueing a message onto the broker.
#[derive(Debug, Clone, Error)]
pub enum SendError {
    /// The ingress queue was at capacity for every retry attempt.
    #[error("queue for '{queue}' is full after {attempts} attempts")]
    QueueFull {
        /// The queue key that was full.
        queue: String,
        /// Total RPUSH attempts made (initial try plus retries).
        attempts: u32,
    },

    /// The serialized message exceeds the configured maximum size.
    #[error("message of {size} bytes exceeds the {limit}-byte limit")]
    TooLarge {
        /// Serialized message size in bytes.
        size: usize,
        /// The configured maximum.
        limit: usize,
    },

    /// The send did not complete within its deadline.
    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    /// The message body could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The broker connection failed.
    #[error("connection failure: {0}")]
    Connection(String),

    /// Any other transport-level send failure.
    #[error("send failed: {0}")]
    Other(String),
}

/// Failures while dequeuing a message from the broker.
#[derive(Debug, Clone, Error)]
pub enum ReceiveError {
    /// No message arrived within the deadline.
    #[error("timed out after {0:?} waiting for a message")]
    Timeout(Duration),

    /// A chunked message arrived out of order, or a chunk never arrived.
    #[error("chunked message violated chunk ordering: {reason}")]
    ChunkGap {
        /// What the assembler observed.
        reason: String,
    },

    /// The message failed framing or structural validation.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The message bytes could not be deserialized.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// The broker connection failed.
    #[error("connection failure: {0}")]
    Connection(String),

    /// Any other transport-level receive failure.
    #[error("receive failed: {0}")]
    Other(String),
}

/// Failures surfaced by the client engine to callers.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The job response carried top-level errors.
    #[error("job failed: [{}]", codes(.errors))]
    JobError {
        /// The job-level errors, in order.
        errors: Vec<WireError>,
    },

    /// One or more action responses carried errors.
    #[error("one or more actions failed: [{}]", action_codes(.actions))]
    CallActionError {
        /// Every action response from the job, in order.
        actions: Vec<ActionResponse>,
    },

    /// The underlying transport failed to send.
    #[error(transparent)]
    Send(#[from] SendError),

    /// The underlying transport failed to receive.
    #[error(transparent)]
    Receive(#[from] ReceiveError),

    /// The response parsed but violated the engine's expectations.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// An expansion route was misconfigured or failed structurally.
    #[error("expansion failed: {0}")]
    Expansion(String),
}

impl ClientError {
    /// `true` for errors a caller may reasonably retry (timeouts and
    /// queue-full), as opposed to definitive failures.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ClientError::Receive(ReceiveError::Timeout(_))
                | ClientError::Send(SendError::QueueFull { .. })
        )
    }
}

fn codes(errors: &[WireError]) -> String {
    errors
        .iter()
        .map(|e| e.code.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn action_codes(actions: &[ActionResponse]) -> String {
    actions
        .iter()
        .flat_map(|a| a.errors.iter())
        .map(|e| e.code.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
