// SPDX-License-Identifier: MIT OR Apache-2.0
//! Job and action records, and their wire-map conversions.
//!
//! The transport layer speaks [`Value`] maps; the engines speak these
//! types. `to_value`/`from_value` define the mapping in both directions
//! and are the single source of truth for the body layout described in
//! the wire contract: a job request is
//! `{actions: [{action, body}], context: {…}, control: {…}}` and a job
//! response is `{actions: [{action, body, errors}], context: {…},
//! errors: […]}`.

use std::collections::{BTreeMap, BTreeSet};

use crate::value::{take_required, Map, Value, ValueError};

/// Error code synthesized when a job names an action the server does not
/// register.
pub const ERROR_CODE_UNKNOWN_ACTION: &str = "UNKNOWN_ACTION";
/// Error code synthesized when a handler fails with an unhandled error.
pub const ERROR_CODE_SERVER_ERROR: &str = "SERVER_ERROR";
/// Error code synthesized when a handler's response fails schema validation.
pub const ERROR_CODE_RESPONSE_NOT_VALID: &str = "RESPONSE_NOT_VALID";
/// Error code for request validation failures.
pub const ERROR_CODE_INVALID: &str = "INVALID";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// A single error in a job or action response.
///
/// `code` is a stable uppercase identifier; `field` marks field-validation
/// errors; `is_caller_error` separates bad-input faults from service faults
/// for downstream observability.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Error {
    /// Stable uppercase machine-readable identifier.
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// The request field this error applies to, for validation errors.
    pub field: Option<String>,
    /// Truncated traceback, when one was captured.
    pub traceback: Option<String>,
    /// Free-form string variables interpolatable by the caller.
    pub variables: BTreeMap<String, String>,
    /// Permissions the caller was missing, for authorization errors.
    pub denied_permissions: Vec<String>,
    /// `true` when the error was caused by bad caller input.
    pub is_caller_error: bool,
}

impl Error {
    /// Create an error with a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    /// Attach the request field this error applies to and mark it as a
    /// caller error.
    #[must_use]
    pub fn for_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self.is_caller_error = true;
        self
    }

    /// Mark this error as caused by bad caller input.
    #[must_use]
    pub fn caller_error(mut self) -> Self {
        self.is_caller_error = true;
        self
    }

    /// Attach a truncated traceback.
    #[must_use]
    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }

    /// Serialize to the canonical wire map.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut m = Map::new();
        m.insert("code".into(), Value::from(self.code.as_str()));
        m.insert("message".into(), Value::from(self.message.as_str()));
        if let Some(field) = &self.field {
            m.insert("field".into(), Value::from(field.as_str()));
        }
        if let Some(tb) = &self.traceback {
            m.insert("traceback".into(), Value::from(tb.as_str()));
        }
        if !self.variables.is_empty() {
            let vars = self
                .variables
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
                .collect::<Map>();
            m.insert("variables".into(), Value::Map(vars));
        }
        if !self.denied_permissions.is_empty() {
            let perms = self
                .denied_permissions
                .iter()
                .map(|p| Value::from(p.as_str()))
                .collect::<Vec<_>>();
            m.insert("denied_permissions".into(), Value::List(perms));
        }
        m.insert("is_caller_error".into(), Value::Bool(self.is_caller_error));
        Value::Map(m)
    }

    /// Parse from the canonical wire map.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError`] when `code` or `message` is missing or a
    /// field has the wrong type.
    pub fn from_value(value: Value) -> Result<Self, ValueError> {
        let mut m = value.into_map()?;
        let code = take_required(&mut m, "code")?.into_string()?;
        let message = take_required(&mut m, "message")?.into_string()?;
        let field = match m.remove("field") {
            Some(Value::Null) | None => None,
            Some(v) => Some(v.into_string()?),
        };
        let traceback = match m.remove("traceback") {
            Some(Value::Null) | None => None,
            Some(v) => Some(v.into_string()?),
        };
        let mut variables = BTreeMap::new();
        if let Some(v) = m.remove("variables") {
            for (k, v) in v.into_map()? {
                variables.insert(k, v.into_string()?);
            }
        }
        let mut denied_permissions = Vec::new();
        if let Some(v) = m.remove("denied_permissions") {
            for p in v.into_list()? {
                denied_permissions.push(p.into_string()?);
            }
        }
        let is_caller_error = m
            .remove("is_caller_error")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Ok(Self {
            code,
            message,
            field,
            traceback,
            variables,
            denied_permissions,
            is_caller_error,
        })
    }
}

// ---------------------------------------------------------------------------
// ActionRequest / ActionResponse
// ---------------------------------------------------------------------------

/// One named unit operation within a job request.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    /// Name of the action; must match a registered action at dispatch.
    pub action: String,
    /// Request body.
    pub body: Value,
}

impl ActionRequest {
    /// Create an action request with an empty body.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            body: Value::map(),
        }
    }

    /// Create an action request with the given body map.
    pub fn with_body(action: impl Into<String>, body: Value) -> Self {
        Self {
            action: action.into(),
            body,
        }
    }

    /// Serialize to the canonical wire map.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut m = Map::new();
        m.insert("action".into(), Value::from(self.action.as_str()));
        m.insert("body".into(), self.body.clone());
        Value::Map(m)
    }

    /// Parse from the canonical wire map.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError`] on a missing `action` or non-map shape.
    pub fn from_value(value: Value) -> Result<Self, ValueError> {
        let mut m = value.into_map()?;
        let action = take_required(&mut m, "action")?.into_string()?;
        if action.is_empty() {
            return Err(ValueError::InvalidValue {
                field: "action",
                reason: "action name must not be empty".into(),
            });
        }
        let body = m.remove("body").unwrap_or_else(Value::map);
        Ok(Self { action, body })
    }
}

/// The server's response to one [`ActionRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResponse {
    /// Echo of the request's action name.
    pub action: String,
    /// Response body; may be `None` when `errors` is non-empty.
    pub body: Option<Value>,
    /// Errors raised by validation or the handler, in order.
    pub errors: Vec<Error>,
}

impl ActionResponse {
    /// A successful response with the given body.
    pub fn new(action: impl Into<String>, body: Value) -> Self {
        Self {
            action: action.into(),
            body: Some(body),
            errors: Vec::new(),
        }
    }

    /// A failed response carrying only errors.
    pub fn from_errors(action: impl Into<String>, errors: Vec<Error>) -> Self {
        Self {
            action: action.into(),
            body: None,
            errors,
        }
    }

    /// `true` when the response carries at least one error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Serialize to the canonical wire map.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut m = Map::new();
        m.insert("action".into(), Value::from(self.action.as_str()));
        m.insert(
            "body".into(),
            self.body.clone().unwrap_or(Value::Null),
        );
        m.insert(
            "errors".into(),
            Value::List(self.errors.iter().map(Error::to_value).collect()),
        );
        Value::Map(m)
    }

    /// Parse from the canonical wire map.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError`] on a missing `action` or malformed errors.
    pub fn from_value(value: Value) -> Result<Self, ValueError> {
        let mut m = value.into_map()?;
        let action = take_required(&mut m, "action")?.into_string()?;
        let body = match m.remove("body") {
            Some(Value::Null) | None => None,
            Some(v) => Some(v),
        };
        let mut errors = Vec::new();
        if let Some(v) = m.remove("errors") {
            for e in v.into_list()? {
                errors.push(Error::from_value(e)?);
            }
        }
        Ok(Self {
            action,
            body,
            errors,
        })
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Caller context propagated verbatim into nested calls.
///
/// `switches` has set semantics. Arbitrary service-defined keys ride in
/// `extra` and survive the round trip untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Context {
    /// Opaque string linking nested calls in logs.
    pub correlation_id: String,
    /// Client-scoped unique request number; filled in by the client engine.
    pub request_id: u64,
    /// Feature-flag switches, set semantics.
    pub switches: BTreeSet<i64>,
    /// Arbitrary service-defined context keys.
    pub extra: Map,
}

impl Context {
    /// Create a context with the given correlation id.
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            ..Self::default()
        }
    }

    /// Add a switch (set semantics; re-adding is a no-op).
    #[must_use]
    pub fn with_switch(mut self, switch: i64) -> Self {
        self.switches.insert(switch);
        self
    }

    /// `true` when the given switch is active.
    #[must_use]
    pub fn is_switch_active(&self, switch: i64) -> bool {
        self.switches.contains(&switch)
    }

    /// Serialize to the canonical wire map.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut m = self.extra.clone();
        m.insert(
            "correlation_id".into(),
            Value::from(self.correlation_id.as_str()),
        );
        m.insert("request_id".into(), Value::Int(self.request_id as i64));
        m.insert(
            "switches".into(),
            Value::List(self.switches.iter().map(|s| Value::Int(*s)).collect()),
        );
        Value::Map(m)
    }

    /// Parse from the canonical wire map.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError`] on malformed known keys; unknown keys are
    /// preserved in `extra`.
    pub fn from_value(value: Value) -> Result<Self, ValueError> {
        let mut m = value.into_map()?;
        let correlation_id = match m.remove("correlation_id") {
            Some(v) => v.into_string()?,
            None => String::new(),
        };
        let request_id = m
            .remove("request_id")
            .and_then(|v| v.as_i64())
            .unwrap_or(0) as u64;
        let mut switches = BTreeSet::new();
        if let Some(v) = m.remove("switches") {
            for s in v.into_list()? {
                switches.insert(s.as_i64().ok_or(ValueError::WrongType {
                    expected: "int",
                    actual: "non-int switch",
                })?);
            }
        }
        Ok(Self {
            correlation_id,
            request_id,
            switches,
            extra: m,
        })
    }
}

// ---------------------------------------------------------------------------
// Control
// ---------------------------------------------------------------------------

/// Per-job control directives.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Control {
    /// Keep executing remaining actions after one fails.
    pub continue_on_error: bool,
    /// The server must not enqueue a response at all.
    pub suppress_response: bool,
    /// Per-job timeout in seconds, overriding the client default.
    pub timeout: Option<u64>,
    /// Arbitrary additional control keys.
    pub extra: Map,
}

impl Control {
    /// Serialize to the canonical wire map.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut m = self.extra.clone();
        m.insert(
            "continue_on_error".into(),
            Value::Bool(self.continue_on_error),
        );
        m.insert(
            "suppress_response".into(),
            Value::Bool(self.suppress_response),
        );
        if let Some(t) = self.timeout {
            m.insert("timeout".into(), Value::Int(t as i64));
        }
        Value::Map(m)
    }

    /// Parse from the canonical wire map.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError`] when the value is not a map.
    pub fn from_value(value: Value) -> Result<Self, ValueError> {
        let mut m = value.into_map()?;
        let continue_on_error = m
            .remove("continue_on_error")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let suppress_response = m
            .remove("suppress_response")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let timeout = m
            .remove("timeout")
            .and_then(|v| v.as_i64())
            .map(|t| t.max(0) as u64);
        Ok(Self {
            continue_on_error,
            suppress_response,
            timeout,
            extra: m,
        })
    }
}

// ---------------------------------------------------------------------------
// JobRequest / JobResponse
// ---------------------------------------------------------------------------

/// An ordered group of actions sent together to a single service.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    /// Actions to execute, in order; must be non-empty to pass validation.
    pub actions: Vec<ActionRequest>,
    /// Caller context.
    pub context: Context,
    /// Per-job control directives.
    pub control: Control,
}

impl JobRequest {
    /// Create a job request from actions, with default context and control.
    #[must_use]
    pub fn new(actions: Vec<ActionRequest>) -> Self {
        Self {
            actions,
            context: Context::default(),
            control: Control::default(),
        }
    }

    /// Serialize to the canonical wire map.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut m = Map::new();
        m.insert(
            "actions".into(),
            Value::List(self.actions.iter().map(ActionRequest::to_value).collect()),
        );
        m.insert("context".into(), self.context.to_value());
        m.insert("control".into(), self.control.to_value());
        Value::Map(m)
    }

    /// Parse from the canonical wire map.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError`] on a missing `actions` list or a malformed
    /// context or control map.
    pub fn from_value(value: Value) -> Result<Self, ValueError> {
        let mut m = value.into_map()?;
        let mut actions = Vec::new();
        for a in take_required(&mut m, "actions")?.into_list()? {
            actions.push(ActionRequest::from_value(a)?);
        }
        let context = match m.remove("context") {
            Some(v) => Context::from_value(v)?,
            None => Context::default(),
        };
        let control = match m.remove("control") {
            Some(v) => Control::from_value(v)?,
            None => Control::default(),
        };
        Ok(Self {
            actions,
            context,
            control,
        })
    }
}

/// The server's aggregated response to a [`JobRequest`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobResponse {
    /// One response per executed action, in request order.
    pub actions: Vec<ActionResponse>,
    /// Context echoed back to the caller.
    pub context: Map,
    /// Job-level errors; when non-empty, `actions` may be empty.
    pub errors: Vec<Error>,
}

impl JobResponse {
    /// A response carrying only job-level errors.
    #[must_use]
    pub fn from_errors(errors: Vec<Error>) -> Self {
        Self {
            errors,
            ..Self::default()
        }
    }

    /// `true` when the job or any action carries an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.actions.iter().any(ActionResponse::has_errors)
    }

    /// Serialize to the canonical wire map.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut m = Map::new();
        m.insert(
            "actions".into(),
            Value::List(self.actions.iter().map(ActionResponse::to_value).collect()),
        );
        m.insert("context".into(), Value::Map(self.context.clone()));
        m.insert(
            "errors".into(),
            Value::List(self.errors.iter().map(Error::to_value).collect()),
        );
        Value::Map(m)
    }

    /// Parse from the canonical wire map.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError`] on malformed action responses or errors.
    pub fn from_value(value: Value) -> Result<Self, ValueError> {
        let mut m = value.into_map()?;
        let mut actions = Vec::new();
        if let Some(v) = m.remove("actions") {
            for a in v.into_list()? {
                actions.push(ActionResponse::from_value(a)?);
            }
        }
        let context = match m.remove("context") {
            Some(v) => v.into_map()?,
            None => Map::new(),
        };
        let mut errors = Vec::new();
        if let Some(v) = m.remove("errors") {
            for e in v.into_list()? {
                errors.push(Error::from_value(e)?);
            }
        }
        Ok(Self {
            actions,
            context,
            errors,
        })
    }
}
