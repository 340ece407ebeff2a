// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire framing: the ASCII preamble and protocol version semantics.
//!
//! A version ≥ 2 frame is `pysoa-redis/<v>//header:value;…` followed by
//! the payload bytes; a version 1 frame is the bare payload, its content
//! type known by prior agreement. Header names are lowercase and
//! case-sensitive; unknown names are ignored on decode. Version 2
//! supports only `content-type`; version 3 adds `chunk-count` and
//! `chunk-id`.

use std::fmt;

use thiserror::Error;

/// The ASCII magic that opens every version ≥ 2 preamble.
pub const PROTOCOL_PREFIX: &str = "pysoa-redis";

const HEADER_CONTENT_TYPE: &str = "content-type";
const HEADER_CHUNK_COUNT: &str = "chunk-count";
const HEADER_CHUNK_ID: &str = "chunk-id";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Framing and unframing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The preamble opened correctly but did not parse.
    #[error("invalid preamble: {0}")]
    InvalidPreamble(String),

    /// The preamble named a version this implementation does not speak.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u64),

    /// A header was used with a version that does not support it.
    #[error("header '{name}' requires protocol version {required}, frame is version {version}")]
    HeaderNotSupported {
        /// The offending header name.
        name: &'static str,
        /// Minimum version that supports the header.
        required: u8,
        /// The frame's actual version.
        version: u8,
    },

    /// A known header carried an unparseable value.
    #[error("bad value for header '{name}': {value}")]
    BadHeaderValue {
        /// The header name.
        name: &'static str,
        /// The value that failed to parse.
        value: String,
    },

    /// Chunk headers were inconsistent or out of order.
    #[error("chunk gap: {reason}")]
    ChunkGap {
        /// What the assembler observed.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// ProtocolVersion
// ---------------------------------------------------------------------------

/// The wire protocol versions this implementation speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    /// Bare payload; content type by prior agreement.
    V1,
    /// Preamble with `content-type`.
    V2,
    /// Preamble with `content-type` and chunk headers.
    V3,
}

impl ProtocolVersion {
    /// The newest version, used by default for outgoing requests.
    pub const CURRENT: ProtocolVersion = ProtocolVersion::V3;

    /// Parse a version number.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::UnsupportedVersion`] for anything outside 1–3.
    pub fn from_number(v: u64) -> Result<Self, FrameError> {
        match v {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            3 => Ok(Self::V3),
            other => Err(FrameError::UnsupportedVersion(other)),
        }
    }

    /// The version number carried in the preamble.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
            Self::V3 => 3,
        }
    }

    /// `true` when this version writes a preamble at all.
    #[must_use]
    pub fn supports_headers(self) -> bool {
        self >= Self::V2
    }

    /// `true` when this version supports chunked responses.
    #[must_use]
    pub fn supports_chunking(self) -> bool {
        self >= Self::V3
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

// ---------------------------------------------------------------------------
// FrameHeaders
// ---------------------------------------------------------------------------

/// The headers this implementation reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameHeaders {
    /// Content type of the payload.
    pub content_type: Option<String>,
    /// Total number of chunks; `None` or `Some(1)` means unchunked.
    pub chunk_count: Option<u32>,
    /// 1-based index of this chunk.
    pub chunk_id: Option<u32>,
}

impl FrameHeaders {
    /// Headers naming only a content type.
    #[must_use]
    pub fn for_content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            ..Self::default()
        }
    }

    /// `true` when this frame is one chunk of a larger message.
    #[must_use]
    pub fn is_chunked(&self) -> bool {
        matches!(self.chunk_count, Some(n) if n > 1)
    }
}

/// A decoded frame: version, headers, and the payload bytes (the whole
/// serialized envelope, or one chunk of it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Protocol version the sender framed with.
    pub version: ProtocolVersion,
    /// Decoded headers; always empty for version 1.
    pub headers: FrameHeaders,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Frame a payload for the wire.
///
/// # Errors
///
/// Returns [`FrameError::HeaderNotSupported`] when headers are set for a
/// version that cannot carry them.
pub fn frame(
    payload: &[u8],
    version: ProtocolVersion,
    headers: &FrameHeaders,
) -> Result<Vec<u8>, FrameError> {
    if !version.supports_headers() {
        if headers.content_type.is_some() {
            return Err(FrameError::HeaderNotSupported {
                name: HEADER_CONTENT_TYPE,
                required: 2,
                version: version.as_u8(),
            });
        }
        if headers.chunk_count.is_some() || headers.chunk_id.is_some() {
            return Err(FrameError::HeaderNotSupported {
                name: HEADER_CHUNK_COUNT,
                required: 3,
                version: version.as_u8(),
            });
        }
        return Ok(payload.to_vec());
    }
    if !version.supports_chunking() && (headers.chunk_count.is_some() || headers.chunk_id.is_some())
    {
        return Err(FrameError::HeaderNotSupported {
            name: HEADER_CHUNK_COUNT,
            required: 3,
            version: version.as_u8(),
        });
    }

    let mut preamble = format!("{PROTOCOL_PREFIX}/{}//", version.as_u8());
    if let Some(ct) = &headers.content_type {
        preamble.push_str(HEADER_CONTENT_TYPE);
        preamble.push(':');
        preamble.push_str(ct);
        preamble.push(';');
    }
    if let Some(count) = headers.chunk_count {
        preamble.push_str(HEADER_CHUNK_COUNT);
        preamble.push(':');
        preamble.push_str(&count.to_string());
        preamble.push(';');
    }
    if let Some(id) = headers.chunk_id {
        preamble.push_str(HEADER_CHUNK_ID);
        preamble.push(':');
        preamble.push_str(&id.to_string());
        preamble.push(';');
    }

    let mut out = preamble.into_bytes();
    out.extend_from_slice(payload);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode a wire frame. Absence of the preamble means version 1.
///
/// # Errors
///
/// Returns [`FrameError`] on a malformed preamble, an unsupported
/// version, or an unparseable known header value.
pub fn unframe(bytes: &[u8]) -> Result<Frame, FrameError> {
    let prefix = PROTOCOL_PREFIX.as_bytes();
    if bytes.len() <= prefix.len()
        || &bytes[..prefix.len()] != prefix
        || bytes[prefix.len()] != b'/'
    {
        return Ok(Frame {
            version: ProtocolVersion::V1,
            headers: FrameHeaders::default(),
            payload: bytes.to_vec(),
        });
    }

    let mut pos = prefix.len() + 1;
    let digits_start = pos;
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }
    if pos == digits_start || bytes.len() < pos + 2 || bytes[pos] != b'/' || bytes[pos + 1] != b'/'
    {
        return Err(FrameError::InvalidPreamble(
            "expected '<version>//' after protocol prefix".into(),
        ));
    }
    let version_str = std::str::from_utf8(&bytes[digits_start..pos])
        .map_err(|_| FrameError::InvalidPreamble("non-ASCII version".into()))?;
    let version_num: u64 = version_str
        .parse()
        .map_err(|_| FrameError::InvalidPreamble(format!("bad version '{version_str}'")))?;
    let version = ProtocolVersion::from_number(version_num)?;
    pos += 2;

    let mut headers = FrameHeaders::default();
    loop {
        // A header is `[a-z-]+ ':' [^;]* ';'`; anything else starts the payload.
        let name_start = pos;
        let mut scan = pos;
        while scan < bytes.len() && (bytes[scan].is_ascii_lowercase() || bytes[scan] == b'-') {
            scan += 1;
        }
        if scan == name_start || scan >= bytes.len() || bytes[scan] != b':' {
            break;
        }
        let value_start = scan + 1;
        let mut value_end = value_start;
        while value_end < bytes.len() && bytes[value_end] != b';' {
            value_end += 1;
        }
        if value_end >= bytes.len() {
            break;
        }
        let name = std::str::from_utf8(&bytes[name_start..scan])
            .map_err(|_| FrameError::InvalidPreamble("non-ASCII header name".into()))?;
        let value = std::str::from_utf8(&bytes[value_start..value_end])
            .map_err(|_| FrameError::InvalidPreamble("non-ASCII header value".into()))?;
        apply_header(&mut headers, version, name, value)?;
        pos = value_end + 1;
    }

    Ok(Frame {
        version,
        headers,
        payload: bytes[pos..].to_vec(),
    })
}

fn apply_header(
    headers: &mut FrameHeaders,
    version: ProtocolVersion,
    name: &str,
    value: &str,
) -> Result<(), FrameError> {
    match name {
        HEADER_CONTENT_TYPE => {
            headers.content_type = Some(value.to_owned());
        }
        HEADER_CHUNK_COUNT if version.supports_chunking() => {
            headers.chunk_count = Some(parse_chunk_number(HEADER_CHUNK_COUNT, value)?);
        }
        HEADER_CHUNK_ID if version.supports_chunking() => {
            headers.chunk_id = Some(parse_chunk_number(HEADER_CHUNK_ID, value)?);
        }
        // Unknown names, and chunk headers below version 3, are ignored.
        _ => {}
    }
    Ok(())
}

fn parse_chunk_number(name: &'static str, value: &str) -> Result<u32, FrameError> {
    let n: u32 = value.parse().map_err(|_| FrameError::BadHeaderValue {
        name,
        value: value.to_owned(),
    })?;
    if n == 0 {
        return Err(FrameError::BadHeaderValue {
            name,
            value: value.to_owned(),
        });
    }
    Ok(n)
}
