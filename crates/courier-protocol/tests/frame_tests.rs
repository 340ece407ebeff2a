// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire framing and preamble parsing tests.

use courier_protocol::{frame, unframe, FrameError, FrameHeaders, ProtocolVersion};

fn ct_headers() -> FrameHeaders {
    FrameHeaders::for_content_type("application/msgpack")
}

// ---------------------------------------------------------------------------
// Version 1
// ---------------------------------------------------------------------------

#[test]
fn v1_frame_is_the_bare_payload() {
    let framed = frame(b"payload", ProtocolVersion::V1, &FrameHeaders::default()).unwrap();
    assert_eq!(framed, b"payload");
}

#[test]
fn bytes_without_preamble_decode_as_v1() {
    let decoded = unframe(b"\x81\xa4body\xc0").unwrap();
    assert_eq!(decoded.version, ProtocolVersion::V1);
    assert_eq!(decoded.headers, FrameHeaders::default());
    assert_eq!(decoded.payload, b"\x81\xa4body\xc0");
}

#[test]
fn v1_cannot_carry_headers() {
    let err = frame(b"x", ProtocolVersion::V1, &ct_headers()).unwrap_err();
    assert!(matches!(err, FrameError::HeaderNotSupported { .. }));
}

// ---------------------------------------------------------------------------
// Version 2 and 3 preambles
// ---------------------------------------------------------------------------

#[test]
fn v2_round_trips_content_type() {
    let framed = frame(b"payload", ProtocolVersion::V2, &ct_headers()).unwrap();
    assert!(framed.starts_with(b"pysoa-redis/2//content-type:application/msgpack;"));
    let decoded = unframe(&framed).unwrap();
    assert_eq!(decoded.version, ProtocolVersion::V2);
    assert_eq!(
        decoded.headers.content_type.as_deref(),
        Some("application/msgpack")
    );
    assert_eq!(decoded.payload, b"payload");
}

#[test]
fn v3_round_trips_chunk_headers() {
    let headers = FrameHeaders {
        content_type: Some("application/json".into()),
        chunk_count: Some(4),
        chunk_id: Some(2),
    };
    let framed = frame(b"piece", ProtocolVersion::V3, &headers).unwrap();
    let decoded = unframe(&framed).unwrap();
    assert_eq!(decoded.version, ProtocolVersion::V3);
    assert_eq!(decoded.headers, headers);
    assert_eq!(decoded.payload, b"piece");
}

#[test]
fn v2_rejects_chunk_headers_at_encode_time() {
    let headers = FrameHeaders {
        content_type: None,
        chunk_count: Some(2),
        chunk_id: Some(1),
    };
    let err = frame(b"x", ProtocolVersion::V2, &headers).unwrap_err();
    assert!(matches!(
        err,
        FrameError::HeaderNotSupported { required: 3, .. }
    ));
}

#[test]
fn v2_ignores_chunk_headers_on_decode() {
    let decoded = unframe(b"pysoa-redis/2//chunk-count:3;chunk-id:1;payload").unwrap();
    assert_eq!(decoded.headers.chunk_count, None);
    assert_eq!(decoded.headers.chunk_id, None);
    assert_eq!(decoded.payload, b"payload");
}

#[test]
fn unknown_header_names_are_ignored() {
    let decoded =
        unframe(b"pysoa-redis/3//mystery-header:whatever;content-type:application/json;x").unwrap();
    assert_eq!(
        decoded.headers.content_type.as_deref(),
        Some("application/json")
    );
    assert_eq!(decoded.payload, b"x");
}

#[test]
fn unsupported_version_is_rejected() {
    let err = unframe(b"pysoa-redis/9//payload").unwrap_err();
    assert!(matches!(err, FrameError::UnsupportedVersion(9)));
}

#[test]
fn malformed_version_is_rejected() {
    assert!(unframe(b"pysoa-redis/x//payload").is_err());
    assert!(unframe(b"pysoa-redis/3/payload").is_err());
}

#[test]
fn zero_chunk_count_is_rejected() {
    let err = unframe(b"pysoa-redis/3//chunk-count:0;x").unwrap_err();
    assert!(matches!(err, FrameError::BadHeaderValue { .. }));
}

#[test]
fn payload_resembling_headers_stops_at_first_non_header() {
    // Payload begins with '{' which cannot start a header name.
    let framed = frame(b"{\"k\":1}", ProtocolVersion::V2, &ct_headers()).unwrap();
    let decoded = unframe(&framed).unwrap();
    assert_eq!(decoded.payload, b"{\"k\":1}");
}
