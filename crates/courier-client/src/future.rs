// SPDX-License-Identifier: MIT OR Apache-2.0
//! The future-style response handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use courier_core::model::JobResponse;
use courier_core::{ClientError, ReceiveError};
use tokio::sync::Mutex;

use crate::{CallOptions, Client};

/// A handle to a job response that has been requested but not yet
/// retrieved.
///
/// [`result`](PendingResponse::result) blocks up to its timeout for the
/// response. A timeout error is **not** cached — the call may be retried
/// and can still succeed if the response arrives late. Any other outcome
/// (success, job error, action error, non-timeout transport error) is
/// cached and returned on every subsequent call.
pub struct PendingResponse {
    client: Client,
    service: String,
    request_id: u64,
    default_timeout: Duration,
    opts: CallOptions,
    outcome: Mutex<Option<Result<JobResponse, ClientError>>>,
    done: AtomicBool,
}

impl PendingResponse {
    pub(crate) fn new(
        client: Client,
        service: String,
        request_id: u64,
        default_timeout: Duration,
        opts: CallOptions,
    ) -> Self {
        Self {
            client,
            service,
            request_id,
            default_timeout,
            opts,
            outcome: Mutex::new(None),
            done: AtomicBool::new(false),
        }
    }

    /// The request id this handle awaits.
    #[must_use]
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// `true` once a terminal outcome has been retrieved and cached.
    #[must_use]
    pub fn done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Wait for the response, up to `timeout` (or the request's default
    /// timeout when `None`).
    ///
    /// # Errors
    ///
    /// [`ReceiveError::Timeout`] when the wait elapses (retriable);
    /// otherwise the same errors as [`Client::call_actions`], cached.
    pub async fn result(&self, timeout: Option<Duration>) -> Result<JobResponse, ClientError> {
        let mut outcome = self.outcome.lock().await;
        if let Some(cached) = outcome.as_ref() {
            return cached.clone();
        }
        let wait = timeout.unwrap_or(self.default_timeout);
        let received = self
            .client
            .wait_for_service_response(&self.service, self.request_id, wait)
            .await;
        match received {
            Err(e @ ClientError::Receive(ReceiveError::Timeout(_))) => Err(e),
            other => {
                let terminal = match other {
                    Ok(response) => self.client.postprocess(response, &self.opts).await,
                    Err(e) => Err(e),
                };
                *outcome = Some(terminal.clone());
                self.done.store(true, Ordering::Release);
                terminal
            }
        }
    }
}
