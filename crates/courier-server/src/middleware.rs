// SPDX-License-Identifier: MIT OR Apache-2.0
//! Server-side middleware: wrappers around the job pipeline and around
//! each action handler.

use std::sync::Arc;
use std::time::Instant;

use courier_core::middleware::JobHandler;
use courier_core::redact::redact_value;

use crate::action::ActionHandlerFn;

/// Wraps the server's job processing and action dispatch.
///
/// Both methods default to the identity, so a middleware only overrides
/// the layer it cares about. The composed stack is built once at server
/// start; middleware must be re-entrant.
pub trait ServerMiddleware: Send + Sync {
    /// Wrap the whole-job pipeline.
    fn wrap_job(&self, next: JobHandler) -> JobHandler {
        next
    }

    /// Wrap each action handler.
    fn wrap_action(&self, next: ActionHandlerFn) -> ActionHandlerFn {
        next
    }
}

// ---------------------------------------------------------------------------
// RequestLoggingMiddleware
// ---------------------------------------------------------------------------

/// Logs each job with structured fields, redacting sensitive request
/// fields before anything reaches a log line.
pub struct RequestLoggingMiddleware {
    sensitive_fields: Vec<String>,
}

impl RequestLoggingMiddleware {
    /// Create the middleware with the fields to censor.
    #[must_use]
    pub fn new(sensitive_fields: Vec<String>) -> Self {
        Self { sensitive_fields }
    }
}

impl ServerMiddleware for RequestLoggingMiddleware {
    fn wrap_job(&self, next: JobHandler) -> JobHandler {
        let sensitive = Arc::new(self.sensitive_fields.clone());
        Arc::new(move |job| {
            let next = Arc::clone(&next);
            let sensitive = Arc::clone(&sensitive);
            Box::pin(async move {
                let correlation_id = job.context.correlation_id.clone();
                let request_id = job.context.request_id;
                let action_names: Vec<String> =
                    job.actions.iter().map(|a| a.action.clone()).collect();
                if tracing::enabled!(tracing::Level::DEBUG) {
                    for action in &job.actions {
                        tracing::debug!(
                            target: "courier.server",
                            request_id,
                            action = %action.action,
                            body = ?redact_value(&action.body, sensitive.as_slice()),
                            "action request"
                        );
                    }
                }
                let start = Instant::now();

                let response = next(job).await;

                let error_count = response.errors.len()
                    + response
                        .actions
                        .iter()
                        .map(|a| a.errors.len())
                        .sum::<usize>();
                tracing::info!(
                    target: "courier.server",
                    request_id,
                    correlation_id = %correlation_id,
                    actions = ?action_names,
                    errors = error_count,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "job processed"
                );
                response
            })
        })
    }
}
