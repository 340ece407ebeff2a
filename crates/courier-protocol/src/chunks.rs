// SPDX-License-Identifier: MIT OR Apache-2.0
//! Splitting oversized payloads into ordered chunks, and putting them
//! back together.
//!
//! Only responses are ever chunked, and only for peers whose request
//! frame advertised protocol version 3. Chunks must arrive in order by
//! `chunk-id` starting at 1 with an identical `chunk-count` on every
//! chunk; any violation discards the whole message as a chunk gap.

use crate::frame::{Frame, FrameError, FrameHeaders};

/// Split a payload into at most `u32::MAX` chunks of `chunk_size` bytes
/// (the final chunk may be shorter). A payload no larger than
/// `chunk_size` yields a single chunk.
#[must_use]
pub fn split_into_chunks(payload: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    if payload.is_empty() {
        return vec![payload];
    }
    payload.chunks(chunk_size.max(1)).collect()
}

/// Reassembles a chunked message, enforcing order and consistency.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    expected_count: Option<u32>,
    next_id: u32,
    buffer: Vec<u8>,
}

impl ChunkAssembler {
    /// Create an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` once at least one chunk has been accepted and more remain.
    #[must_use]
    pub fn in_progress(&self) -> bool {
        self.expected_count.is_some()
    }

    /// Feed the next frame.
    ///
    /// Returns `Ok(Some(payload))` when the message is complete — either
    /// an unchunked frame, or the final chunk of a sequence — and
    /// `Ok(None)` when more chunks are expected.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::ChunkGap`] when a chunk arrives out of
    /// order, with a differing `chunk-count`, with a missing `chunk-id`,
    /// or when an unchunked frame interrupts an in-progress sequence.
    pub fn push(&mut self, frame: &Frame) -> Result<Option<Vec<u8>>, FrameError> {
        if !frame.headers.is_chunked() {
            if self.in_progress() {
                return Err(FrameError::ChunkGap {
                    reason: "unchunked frame arrived mid-sequence".into(),
                });
            }
            return Ok(Some(frame.payload.clone()));
        }

        let count = frame.headers.chunk_count.unwrap_or(1);
        let id = frame.headers.chunk_id.ok_or(FrameError::ChunkGap {
            reason: "chunked frame missing chunk-id".into(),
        })?;
        if id > count {
            return Err(FrameError::ChunkGap {
                reason: format!("chunk-id {id} exceeds chunk-count {count}"),
            });
        }

        match self.expected_count {
            None => {
                if id != 1 {
                    return Err(FrameError::ChunkGap {
                        reason: format!("first chunk has chunk-id {id}, expected 1"),
                    });
                }
                self.expected_count = Some(count);
                self.next_id = 2;
            }
            Some(expected) => {
                if count != expected {
                    return Err(FrameError::ChunkGap {
                        reason: format!(
                            "chunk-count changed from {expected} to {count} mid-sequence"
                        ),
                    });
                }
                if id != self.next_id {
                    return Err(FrameError::ChunkGap {
                        reason: format!("expected chunk-id {}, got {id}", self.next_id),
                    });
                }
                self.next_id += 1;
            }
        }

        self.buffer.extend_from_slice(&frame.payload);
        if id == count {
            self.expected_count = None;
            self.next_id = 0;
            return Ok(Some(std::mem::take(&mut self.buffer)));
        }
        Ok(None)
    }
}

/// Frame a payload as an ordered sequence of chunked frames.
///
/// # Errors
///
/// Returns [`FrameError`] when the version cannot carry chunk headers.
pub fn frame_as_chunks(
    payload: &[u8],
    chunk_size: usize,
    version: crate::frame::ProtocolVersion,
    content_type: Option<&str>,
) -> Result<Vec<Vec<u8>>, FrameError> {
    let pieces = split_into_chunks(payload, chunk_size);
    let count = pieces.len() as u32;
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| {
            let headers = FrameHeaders {
                content_type: content_type.map(str::to_owned),
                chunk_count: Some(count),
                chunk_id: Some(i as u32 + 1),
            };
            crate::frame::frame(piece, version, &headers)
        })
        .collect()
}
