// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod middleware;
pub mod model;
pub mod redact;
pub mod transport;
pub mod value;

mod errors;

pub use errors::{ClientError, ReceiveError, SendError};
pub use model::{
    ActionRequest, ActionResponse, Context, Control, Error, JobRequest, JobResponse,
    ERROR_CODE_INVALID, ERROR_CODE_RESPONSE_NOT_VALID, ERROR_CODE_SERVER_ERROR,
    ERROR_CODE_UNKNOWN_ACTION,
};
pub use transport::{
    ClientTransport, MessageMeta, ReceivedRequest, ReceivedResponse, ServerTransport,
};
pub use value::{CurrencyAmount, Value, ValueError};
