// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod action;
pub mod cli;
pub mod harakiri;
pub mod heartbeat;
pub mod introspection;
pub mod middleware;
pub mod supervisor;
pub mod validation;
pub mod watcher;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use courier_client::Client;
use courier_config::ServerRuntimeSettings;
use courier_core::middleware::{compose, JobHandler};
use courier_core::model::{
    ActionResponse, Error as WireError, JobRequest, JobResponse, ERROR_CODE_INVALID,
    ERROR_CODE_RESPONSE_NOT_VALID, ERROR_CODE_SERVER_ERROR, ERROR_CODE_UNKNOWN_ACTION,
};
use courier_core::transport::{ReceivedRequest, ServerTransport};
use courier_core::value::Map;
use courier_core::SendError;
use futures::FutureExt;

use crate::action::{ActionCall, ActionHandlerFn, ActionRecord};
use crate::harakiri::Harakiri;
use crate::heartbeat::Heartbeat;
use crate::introspection::ActionMetadata;
use crate::middleware::ServerMiddleware;
use crate::validation::{BasicValidator, JobValidator};

pub use crate::action::ActionFailure;
pub use crate::harakiri::EXIT_HARAKIRI;

/// Error code reported when a response is too large to enqueue for the
/// requesting peer's protocol version.
pub const ERROR_CODE_RESPONSE_TOO_LARGE: &str = "RESPONSE_TOO_LARGE";

const TRACEBACK_LIMIT: usize = 4096;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fatal server startup or shutdown failures. Per-request failures are
/// converted into error responses, never surfaced here.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// An I/O failure outside request handling (e.g. the heartbeat
    /// file).
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// Cloneable flag coordinating graceful shutdown across the run loop,
/// the signal listener, and the file watcher.
#[derive(Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    /// Request shutdown. Returns `true` when this call was the first
    /// request, `false` when shutdown was already in progress — the
    /// signal handler uses that to make a second signal escalate.
    pub fn request(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    /// `true` once shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Extension points around the run loop. Every method defaults to a
/// no-op, so implementors override only the moments they care about.
pub trait ServerHooks: Send + Sync {
    /// Called once in the parent process before workers are forked.
    /// Never called in the workers themselves.
    fn pre_fork(&self) {}

    /// Called once before the first receive.
    fn setup(&self) {}

    /// Called once after the loop exits, before the heartbeat file is
    /// removed.
    fn teardown(&self) {}

    /// Called after each receive that yielded no message.
    fn perform_idle_actions(&self) {}

    /// Called before each received job is processed.
    fn perform_pre_request_actions(&self) {}

    /// Called after each job's response has been handled.
    fn perform_post_request_actions(&self) {}
}

/// The default hooks: nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl ServerHooks for NoopHooks {}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A server for one named service.
pub struct Server {
    service_name: String,
    settings: ServerRuntimeSettings,
    transport: Arc<dyn ServerTransport>,
    actions: BTreeMap<String, Arc<ActionRecord>>,
    middleware: Vec<Arc<dyn ServerMiddleware>>,
    validator: Arc<dyn JobValidator>,
    client: Option<Client>,
    hooks: Arc<dyn ServerHooks>,
    shutdown: ShutdownHandle,
    fork_id: Option<u32>,
}

impl Server {
    /// Create a server over a connected transport.
    #[must_use]
    pub fn new(
        service_name: impl Into<String>,
        settings: ServerRuntimeSettings,
        transport: Arc<dyn ServerTransport>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            settings,
            transport,
            actions: BTreeMap::new(),
            middleware: Vec::new(),
            validator: Arc::new(BasicValidator),
            client: None,
            hooks: Arc::new(NoopHooks),
            shutdown: ShutdownHandle::default(),
            fork_id: None,
        }
    }

    /// Register an action. Registering a name again replaces the
    /// earlier record.
    pub fn register_action(&mut self, record: ActionRecord) -> &mut Self {
        self.actions
            .insert(record.name.clone(), Arc::new(record));
        self
    }

    /// Append a middleware. Middleware wrap in registration order:
    /// the first registered is outermost.
    pub fn add_middleware(&mut self, middleware: Arc<dyn ServerMiddleware>) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    /// Replace the validator.
    pub fn set_validator(&mut self, validator: Arc<dyn JobValidator>) -> &mut Self {
        self.validator = validator;
        self
    }

    /// Provide the outbound client handed (context-derived) to action
    /// handlers for nested calls.
    pub fn set_client(&mut self, client: Client) -> &mut Self {
        self.client = Some(client);
        self
    }

    /// Replace the lifecycle hooks.
    pub fn set_hooks(&mut self, hooks: Arc<dyn ServerHooks>) -> &mut Self {
        self.hooks = hooks;
        self
    }

    /// Record this worker's fork index (used in the heartbeat path and
    /// logs).
    pub fn set_fork_id(&mut self, fork_id: Option<u32>) -> &mut Self {
        self.fork_id = fork_id;
        self
    }

    /// The handle the signal listener and file watcher use to request
    /// graceful shutdown.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// The service this server handles.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Run the worker loop until shutdown is requested.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] only for fatal startup failures; request
    /// failures become error responses.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        self.register_default_actions();
        let pipeline = self.build_pipeline();

        self.hooks.setup();
        let heartbeat = match &self.settings.heartbeat_file {
            Some(template) => Some(Heartbeat::create(template, self.fork_id)?),
            None => None,
        };
        let harakiri = Harakiri::start(Duration::from_secs(self.settings.harakiri.timeout));
        let receive_timeout = Duration::from_secs(self.settings.receive_timeout.max(1));

        tracing::info!(
            target: "courier.server",
            service = %self.service_name,
            fork_id = ?self.fork_id,
            actions = self.actions.len(),
            "server ready"
        );

        while !self.shutdown.is_shutting_down() {
            let received = match self.transport.receive_request_message(receive_timeout).await {
                Err(e) => {
                    tracing::error!(
                        target: "courier.server",
                        error = %e,
                        "receive failed, backing off"
                    );
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
                Ok(None) => {
                    if let Some(hb) = &heartbeat {
                        hb.tick();
                    }
                    self.hooks.perform_idle_actions();
                    continue;
                }
                Ok(Some(received)) => received,
            };

            self.hooks.perform_pre_request_actions();
            let ReceivedRequest {
                request_id,
                meta,
                body,
            } = received;
            if let Some(h) = &harakiri {
                h.begin(request_id);
            }

            let (suppress_response, response) = match JobRequest::from_value(body) {
                Err(e) => (
                    false,
                    JobResponse::from_errors(vec![WireError::new(
                        ERROR_CODE_INVALID,
                        format!("malformed job request: {e}"),
                    )
                    .caller_error()]),
                ),
                Ok(job) => {
                    let suppress = job.control.suppress_response;
                    (suppress, (pipeline)(job).await)
                }
            };
            if let Some(h) = &harakiri {
                h.end();
            }

            if !suppress_response && meta.reply_to.is_some() {
                self.send_response(request_id, &meta, response).await;
            }
            self.hooks.perform_post_request_actions();
            if let Some(hb) = &heartbeat {
                hb.tick();
            }
        }

        self.hooks.teardown();
        if let Some(hb) = heartbeat {
            hb.remove();
        }
        tracing::info!(
            target: "courier.server",
            service = %self.service_name,
            "server stopped"
        );
        Ok(())
    }

    async fn send_response(
        &self,
        request_id: u64,
        meta: &courier_core::transport::MessageMeta,
        response: JobResponse,
    ) {
        match self
            .transport
            .send_response_message(request_id, meta, &response)
            .await
        {
            Ok(()) => {}
            Err(SendError::TooLarge { size, limit }) => {
                tracing::warn!(
                    target: "courier.server",
                    request_id,
                    size,
                    limit,
                    "response too large for the requesting peer, sending error instead"
                );
                let fallback = JobResponse::from_errors(vec![WireError::new(
                    ERROR_CODE_RESPONSE_TOO_LARGE,
                    format!("response of {size} bytes exceeds the {limit}-byte limit"),
                )]);
                if let Err(e) = self
                    .transport
                    .send_response_message(request_id, meta, &fallback)
                    .await
                {
                    tracing::error!(
                        target: "courier.server",
                        request_id,
                        error = %e,
                        "failed to send response-too-large error"
                    );
                }
            }
            Err(e) => {
                tracing::error!(
                    target: "courier.server",
                    request_id,
                    error = %e,
                    "failed to send response"
                );
            }
        }
    }

    fn register_default_actions(&mut self) {
        if !self.actions.contains_key("status") {
            self.actions.insert(
                "status".into(),
                Arc::new(introspection::status_record(&self.service_name)),
            );
        }
        if !self.actions.contains_key("introspect") {
            let mut metadata: Vec<ActionMetadata> = self
                .actions
                .values()
                .map(|r| ActionMetadata::of(r))
                .collect();
            metadata.push(ActionMetadata {
                name: "introspect".into(),
                description: "Enumerate the service's registered actions and schemas".into(),
                request_schema: None,
                response_schema: None,
            });
            self.actions.insert(
                "introspect".into(),
                Arc::new(introspection::introspect_record(metadata)),
            );
        }
    }

    fn build_pipeline(&self) -> JobHandler {
        let mut wrapped = BTreeMap::new();
        for (name, record) in &self.actions {
            let stack = compose(&self.middleware, record.handler.clone(), |m, next| {
                m.wrap_action(next)
            });
            wrapped.insert(name.clone(), stack);
        }
        let state = Arc::new(PipelineState {
            service_name: self.service_name.clone(),
            records: self.actions.clone(),
            wrapped,
            validator: Arc::clone(&self.validator),
            client: self.client.clone(),
        });
        let base: JobHandler = Arc::new(move |job| {
            let state = Arc::clone(&state);
            Box::pin(async move { process_job(state, job).await })
        });
        compose(&self.middleware, base, |m, next| m.wrap_job(next))
    }
}

// ---------------------------------------------------------------------------
// Job processing
// ---------------------------------------------------------------------------

struct PipelineState {
    service_name: String,
    records: BTreeMap<String, Arc<ActionRecord>>,
    wrapped: BTreeMap<String, ActionHandlerFn>,
    validator: Arc<dyn JobValidator>,
    client: Option<Client>,
}

async fn process_job(state: Arc<PipelineState>, job: JobRequest) -> JobResponse {
    let validation_errors = state.validator.validate_job(&job);
    if !validation_errors.is_empty() {
        return JobResponse::from_errors(validation_errors);
    }

    let nested_client = state.client.as_ref().map(|c| c.derive(job.context.clone()));
    let mut actions_out = Vec::with_capacity(job.actions.len());

    for request in &job.actions {
        let response = run_action(&state, &job, request, nested_client.clone()).await;
        let failed = response.has_errors();
        actions_out.push(response);
        if failed && !job.control.continue_on_error {
            break;
        }
    }

    let mut context = Map::new();
    context.insert(
        "correlation_id".into(),
        courier_core::value::Value::from(job.context.correlation_id.as_str()),
    );
    JobResponse {
        actions: actions_out,
        context,
        errors: Vec::new(),
    }
}

async fn run_action(
    state: &PipelineState,
    job: &JobRequest,
    request: &courier_core::model::ActionRequest,
    nested_client: Option<Client>,
) -> ActionResponse {
    let Some(handler) = state.wrapped.get(&request.action) else {
        return ActionResponse::from_errors(
            &request.action,
            vec![WireError::new(
                ERROR_CODE_UNKNOWN_ACTION,
                format!(
                    "no action '{}' is registered for service '{}'",
                    request.action, state.service_name
                ),
            )
            .caller_error()],
        );
    };
    let record = &state.records[&request.action];

    let request_errors = state
        .validator
        .validate_action_request(record, &request.body);
    if !request_errors.is_empty() {
        return ActionResponse::from_errors(&request.action, request_errors);
    }

    let call = ActionCall {
        action: request.action.clone(),
        body: request.body.clone(),
        context: job.context.clone(),
        control: job.control.clone(),
        client: nested_client,
    };
    let outcome = std::panic::AssertUnwindSafe((handler)(call))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(body)) => {
            let response_errors = state.validator.validate_action_response(record, &body);
            if response_errors.is_empty() {
                ActionResponse::new(&request.action, body)
            } else {
                let errors = response_errors
                    .into_iter()
                    .map(|mut e| {
                        e.code = ERROR_CODE_RESPONSE_NOT_VALID.into();
                        e.is_caller_error = false;
                        e
                    })
                    .collect();
                ActionResponse::from_errors(&request.action, errors)
            }
        }
        Ok(Err(failure)) => ActionResponse::from_errors(&request.action, failure.errors),
        Err(panic) => {
            let detail = panic_message(panic.as_ref());
            tracing::error!(
                target: "courier.server",
                action = %request.action,
                request_id = job.context.request_id,
                detail = %detail,
                "action handler panicked"
            );
            ActionResponse::from_errors(
                &request.action,
                vec![WireError::new(
                    ERROR_CODE_SERVER_ERROR,
                    "an unexpected error occurred while processing the action",
                )
                .with_traceback(truncate(&detail, TRACEBACK_LIMIT))],
            )
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

fn truncate(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        return s.to_owned();
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… (truncated)", &s[..end])
}
