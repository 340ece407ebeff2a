// SPDX-License-Identifier: MIT OR Apache-2.0
//! The job/action validation seam.
//!
//! Schema validation proper is an external concern; the engine only
//! requires a pass/fail contract producing field errors. The built-in
//! validator enforces the structural rules every job must satisfy and
//! accepts everything else.

use courier_core::model::{Error as WireError, JobRequest, ERROR_CODE_INVALID};
use courier_core::value::Value;

use crate::action::ActionRecord;

/// Validates jobs before dispatch and bodies against declared schemas.
pub trait JobValidator: Send + Sync {
    /// Validate the top-level job. A non-empty return fails the whole
    /// job with those errors; no action is dispatched.
    fn validate_job(&self, job: &JobRequest) -> Vec<WireError>;

    /// Validate one action's request body against its declared schema.
    fn validate_action_request(&self, _record: &ActionRecord, _body: &Value) -> Vec<WireError> {
        Vec::new()
    }

    /// Validate one action's response body against its declared schema.
    fn validate_action_response(&self, _record: &ActionRecord, _body: &Value) -> Vec<WireError> {
        Vec::new()
    }
}

/// The structural checks every server performs, with schema hooks left
/// permissive.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicValidator;

impl JobValidator for BasicValidator {
    fn validate_job(&self, job: &JobRequest) -> Vec<WireError> {
        let mut errors = Vec::new();
        if job.actions.is_empty() {
            errors.push(
                WireError::new(ERROR_CODE_INVALID, "a job must contain at least one action")
                    .for_field("actions"),
            );
        }
        for (i, action) in job.actions.iter().enumerate() {
            if action.action.trim().is_empty() {
                errors.push(
                    WireError::new(ERROR_CODE_INVALID, "action name must not be empty")
                        .for_field(format!("actions.{i}.action")),
                );
            }
        }
        errors
    }
}
