// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod chunks;
pub mod envelope;
pub mod frame;

pub use chunks::{split_into_chunks, ChunkAssembler};
pub use envelope::Envelope;
pub use frame::{frame, unframe, Frame, FrameError, FrameHeaders, ProtocolVersion};
