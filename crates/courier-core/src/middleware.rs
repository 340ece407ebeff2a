// SPDX-License-Identifier: MIT OR Apache-2.0
//! The middleware composition contract shared by both engines.
//!
//! A middleware is a pair of higher-order wrappers around boxed async
//! callables. Given middlewares `M1..Mn` and a base function `B`, the
//! effective call is the onion `M1(M2(…Mn(B)))`, built once per engine
//! lifetime by [`compose`]. A middleware may short-circuit by returning
//! without invoking the callable it wraps; it must not change the call
//! signature, and must be re-entrant when the enclosing engine is
//! concurrent.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::errors::{ReceiveError, SendError};
use crate::model::{JobRequest, JobResponse};
use crate::transport::{MessageMeta, ReceivedResponse};

/// The client engine's send path: one outgoing job request.
pub type SendHandler = Arc<
    dyn Fn(u64, MessageMeta, JobRequest) -> BoxFuture<'static, Result<(), SendError>>
        + Send
        + Sync,
>;

/// The client engine's receive path: one poll of the reply-to queue.
pub type ReceiveHandler = Arc<
    dyn Fn(Duration) -> BoxFuture<'static, Result<Option<ReceivedResponse>, ReceiveError>>
        + Send
        + Sync,
>;

/// The server engine's job path: one dequeued job, processed to a response.
pub type JobHandler =
    Arc<dyn Fn(JobRequest) -> BoxFuture<'static, JobResponse> + Send + Sync>;

/// Wraps the client engine's transport calls.
///
/// Both methods default to the identity, so a middleware only overrides
/// the direction it cares about.
pub trait ClientMiddleware: Send + Sync {
    /// Wrap the send path.
    fn wrap_send(&self, next: SendHandler) -> SendHandler {
        next
    }

    /// Wrap the receive path.
    fn wrap_receive(&self, next: ReceiveHandler) -> ReceiveHandler {
        next
    }
}

/// Build the onion `M1(M2(…Mn(base)))` from an ordered middleware stack.
///
/// `wrap` selects which wrapper each middleware contributes, so one
/// composition helper serves every stack:
///
/// ```
/// # use std::sync::Arc;
/// # use courier_core::middleware::{compose, ClientMiddleware, SendHandler};
/// # use courier_core::SendError;
/// # let middleware: Vec<Arc<dyn ClientMiddleware>> = vec![];
/// # let base: SendHandler =
/// #     Arc::new(|_, _, _| Box::pin(async { Ok::<(), SendError>(()) }));
/// let send = compose(&middleware, base, |m, next| m.wrap_send(next));
/// ```
pub fn compose<M, H>(
    middleware: &[Arc<M>],
    base: H,
    wrap: impl Fn(&M, H) -> H,
) -> H
where
    M: ?Sized,
{
    middleware
        .iter()
        .rev()
        .fold(base, |next, m| wrap(m.as_ref(), next))
}
