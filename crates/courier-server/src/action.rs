// SPDX-License-Identifier: MIT OR Apache-2.0
//! Action registration records and the handler seam.
//!
//! An action handler is an async callable from [`ActionCall`] to a body
//! map, or to [`ActionFailure`] when the action fails in an expected
//! way. Handlers are registered as [`ActionRecord`]s carrying the
//! metadata the default `introspect` action reports.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use courier_client::Client;
use courier_core::model::{Context, Control, Error as WireError};
use courier_core::value::Value;
use futures::future::BoxFuture;

/// Everything a handler receives for one action invocation.
#[derive(Clone)]
pub struct ActionCall {
    /// The action name as dispatched.
    pub action: String,
    /// The request body.
    pub body: Value,
    /// The job's caller context, propagated verbatim.
    pub context: Context,
    /// The job's control directives.
    pub control: Control,
    /// A nested client carrying the caller's context, for handlers that
    /// call other services. `None` when no outbound routing is
    /// configured.
    pub client: Option<Client>,
}

/// An expected action failure, converted by the engine into an action
/// response carrying these errors.
#[derive(Debug, Clone)]
pub struct ActionFailure {
    /// The errors to report, in order.
    pub errors: Vec<WireError>,
}

impl ActionFailure {
    /// A failure with a single error.
    #[must_use]
    pub fn single(error: WireError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let codes: Vec<&str> = self.errors.iter().map(|e| e.code.as_str()).collect();
        write!(f, "action failed: [{}]", codes.join(", "))
    }
}

impl std::error::Error for ActionFailure {}

impl From<WireError> for ActionFailure {
    fn from(error: WireError) -> Self {
        Self::single(error)
    }
}

/// The boxed handler type the dispatch pipeline runs.
pub type ActionHandlerFn =
    Arc<dyn Fn(ActionCall) -> BoxFuture<'static, Result<Value, ActionFailure>> + Send + Sync>;

/// A registered action: the handler plus the metadata introspection
/// reports.
#[derive(Clone)]
pub struct ActionRecord {
    /// The action's name within the service.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Declared request schema, surfaced by introspection and fed to
    /// the configured validator.
    pub request_schema: Option<Value>,
    /// Declared response schema.
    pub response_schema: Option<Value>,
    /// The handler itself.
    pub handler: ActionHandlerFn,
}

impl ActionRecord {
    /// Register a handler under a name.
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ActionCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActionFailure>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            request_schema: None,
            response_schema: None,
            handler: Arc::new(move |call| Box::pin(handler(call))),
        }
    }

    /// Attach a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Attach a request schema.
    #[must_use]
    pub fn with_request_schema(mut self, schema: Value) -> Self {
        self.request_schema = Some(schema);
        self
    }

    /// Attach a response schema.
    #[must_use]
    pub fn with_response_schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }
}

impl fmt::Debug for ActionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRecord")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}
