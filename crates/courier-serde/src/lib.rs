// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod json;
pub mod msgpack;

use std::sync::Arc;

use courier_core::Value;
use thiserror::Error;

pub use json::JsonSerializer;
pub use msgpack::MsgpackSerializer;

/// Content type of the binary packed encoding.
pub const CONTENT_TYPE_MSGPACK: &str = "application/msgpack";
/// Content type of the textual encoding.
pub const CONTENT_TYPE_JSON: &str = "application/json";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// The input value cannot be represented in the target encoding.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// Message bodies must be maps at the top level.
    #[error("cannot encode {0} at the top level; message bodies are maps")]
    TopLevelNotMap(&'static str),

    /// A map used a key the encoding reserves for extension markers.
    #[error("map key '{0}' is reserved by the encoding")]
    ReservedKey(String),

    /// Currency codes must be exactly three ASCII characters.
    #[error("currency code '{0}' is not a 3-character code")]
    BadCurrencyCode(String),

    /// A node has no representation in the target encoding.
    #[error("value not encodable: {0}")]
    Unencodable(String),

    /// The underlying writer failed.
    #[error("encode failed: {0}")]
    Io(String),
}

/// The input bytes do not decode to a well-formed value tree.
#[derive(Debug, Error)]
pub enum DeserializationError {
    /// The bytes are not a well-formed document in this encoding.
    #[error("corrupt message: {0}")]
    Corrupt(String),

    /// An extension marker named a type this decoder does not know.
    #[error("unknown extension type {0}")]
    UnknownExtension(i8),

    /// An extension payload was malformed.
    #[error("malformed {kind} extension: {reason}")]
    MalformedExtension {
        /// Which extension type was malformed.
        kind: &'static str,
        /// What the decoder observed.
        reason: String,
    },

    /// Map keys must be strings.
    #[error("map key is not a string")]
    NonStringKey,

    /// An integer fell outside the 64-bit signed range.
    #[error("integer out of 64-bit signed range")]
    IntOutOfRange,

    /// The decoded document was not a map at the top level.
    #[error("decoded document is not a map")]
    TopLevelNotMap,
}

// ---------------------------------------------------------------------------
// Serializer seam
// ---------------------------------------------------------------------------

/// A message-body encoding with a registered content type.
///
/// `encode` requires a map at the top level — the envelope and every job
/// body are maps by construction — and `decode(encode(v))` must equal `v`
/// structurally for any encodable `v`.
pub trait Serializer: Send + Sync {
    /// MIME-style content type carried in version ≥ 2 wire frames.
    fn content_type(&self) -> &'static str;

    /// Encode a map value to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError`] when `value` is not a map or holds
    /// a node the encoding cannot represent.
    fn encode(&self, value: &Value) -> Result<Vec<u8>, SerializationError>;

    /// Decode bytes back to a map value.
    ///
    /// # Errors
    ///
    /// Returns [`DeserializationError`] on corrupt input.
    fn decode(&self, bytes: &[u8]) -> Result<Value, DeserializationError>;
}

/// Look up the serializer registered for a content type.
///
/// The registry is static: the two canonical encodings are always
/// present, and configuration selects between them by name.
#[must_use]
pub fn serializer_for_content_type(content_type: &str) -> Option<Arc<dyn Serializer>> {
    match content_type {
        CONTENT_TYPE_MSGPACK => Some(Arc::new(MsgpackSerializer)),
        CONTENT_TYPE_JSON => Some(Arc::new(JsonSerializer)),
        _ => None,
    }
}

/// The preferred encoding: binary MessagePack.
#[must_use]
pub fn default_serializer() -> Arc<dyn Serializer> {
    Arc::new(MsgpackSerializer)
}
