// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod expansions;
pub mod future;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use courier_core::middleware::{compose, ClientMiddleware, ReceiveHandler, SendHandler};
use courier_core::model::{ActionRequest, ActionResponse, Context, JobRequest, JobResponse};
use courier_core::transport::{unix_now, ClientTransport, MessageMeta};
use courier_core::value::{Map, Value};
use courier_core::{ClientError, ReceiveError, SendError};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

pub use expansions::{ExpansionRoute, ExpansionSettings};
pub use future::PendingResponse;

/// Engine-level client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Seconds a call waits for its response when neither the call nor
    /// the job control specifies a timeout.
    pub default_timeout: u64,
    /// Seconds added to the call timeout when stamping the message
    /// expiry, so a response in flight at the deadline is not reaped
    /// from the broker before `get_all_responses` can see it.
    pub expiry_buffer: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            default_timeout: 5,
            expiry_buffer: 10,
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Seconds to wait for the response; `None` uses the client default.
    pub timeout: Option<u64>,
    /// Switches unioned into the job context (set semantics).
    pub switches: BTreeSet<i64>,
    /// Extra context keys merged into the job context.
    pub context_extra: Map,
    /// Keep executing remaining actions after one fails.
    pub continue_on_error: bool,
    /// Tell the server not to enqueue a response at all.
    pub suppress_response: bool,
    /// Raise [`ClientError::JobError`] when the response carries
    /// job-level errors.
    pub raise_job_errors: bool,
    /// Raise [`ClientError::CallActionError`] when any action response
    /// carries errors.
    pub raise_action_errors: bool,
    /// In the parallel calls, replace a failed job's slot with its
    /// transport error instead of propagating it.
    pub catch_transport_errors: bool,
    /// Expansions to perform, as object type → expansion names.
    pub expansions: BTreeMap<String, Vec<String>>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            switches: BTreeSet::new(),
            context_extra: Map::new(),
            continue_on_error: false,
            suppress_response: false,
            raise_job_errors: true,
            raise_action_errors: true,
            catch_transport_errors: false,
            expansions: BTreeMap::new(),
        }
    }
}

/// One job in a [`Client::call_jobs_parallel`] batch.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Target service.
    pub service: String,
    /// Actions for that service, in order.
    pub actions: Vec<ActionRequest>,
}

/// Async constructor for the transport of a named service.
pub type TransportFactory = Arc<
    dyn Fn(&str) -> BoxFuture<'static, Result<Arc<dyn ClientTransport>, SendError>>
        + Send
        + Sync,
>;

// ---------------------------------------------------------------------------
// Per-service state
// ---------------------------------------------------------------------------

struct ServiceHandler {
    send: SendHandler,
    receive: ReceiveHandler,
    /// Responses received while waiting for a different request id.
    stash: Mutex<HashMap<u64, JobResponse>>,
    /// Only one task polls the reply-to queue at a time; everyone else
    /// watches the stash.
    receive_lock: Mutex<()>,
}

struct ClientInner {
    settings: ClientSettings,
    factory: TransportFactory,
    middleware: Vec<Arc<dyn ClientMiddleware>>,
    expansions: ExpansionSettings,
    handlers: Mutex<HashMap<String, Arc<ServiceHandler>>>,
    request_counter: AtomicU64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// The client engine.
///
/// Cheap to clone; clones share transports, middleware, the request-id
/// counter, and the response stash. [`Client::derive`] produces a clone
/// carrying a different base context, which is how servers hand nested
/// clients to action handlers with the caller's correlation id intact.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
    context: Context,
}

impl Client {
    /// Build a client.
    ///
    /// The request-id counter starts at a random 32-bit base so ids from
    /// different client processes rarely collide in log searches.
    #[must_use]
    pub fn new(
        settings: ClientSettings,
        factory: TransportFactory,
        middleware: Vec<Arc<dyn ClientMiddleware>>,
        expansions: ExpansionSettings,
    ) -> Self {
        Self::with_context(settings, factory, middleware, expansions, Context::default())
    }

    /// Build a client with an explicit base context.
    #[must_use]
    pub fn with_context(
        settings: ClientSettings,
        factory: TransportFactory,
        middleware: Vec<Arc<dyn ClientMiddleware>>,
        expansions: ExpansionSettings,
        mut context: Context,
    ) -> Self {
        if context.correlation_id.is_empty() {
            context.correlation_id = Uuid::new_v4().to_string();
        }
        Self {
            inner: Arc::new(ClientInner {
                settings,
                factory,
                middleware,
                expansions,
                handlers: Mutex::new(HashMap::new()),
                request_counter: AtomicU64::new(u64::from(rand::random::<u32>())),
            }),
            context,
        }
    }

    /// A clone of this client carrying `context` as its base context.
    ///
    /// The correlation id is preserved as given (or generated when
    /// empty), so calls made through the derived client link to the
    /// originating caller in logs.
    #[must_use]
    pub fn derive(&self, mut context: Context) -> Client {
        if context.correlation_id.is_empty() {
            context.correlation_id = Uuid::new_v4().to_string();
        }
        Client {
            inner: Arc::clone(&self.inner),
            context,
        }
    }

    /// The client's base context.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    // -- public calls -------------------------------------------------------

    /// Send a one-action job and block until its response.
    ///
    /// # Errors
    ///
    /// Transport errors, [`ClientError::JobError`], and
    /// [`ClientError::CallActionError`] per the options' raise flags.
    pub async fn call_action(
        &self,
        service: &str,
        action: &str,
        body: Value,
        opts: &CallOptions,
    ) -> Result<ActionResponse, ClientError> {
        let response = self
            .call_actions(service, vec![ActionRequest::with_body(action, body)], opts)
            .await?;
        response
            .actions
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::InvalidResponse("response carried no actions".into()))
    }

    /// Send one job with multiple actions and block until its response.
    ///
    /// # Errors
    ///
    /// Transport errors, and job/action errors per the raise flags.
    pub async fn call_actions(
        &self,
        service: &str,
        actions: Vec<ActionRequest>,
        opts: &CallOptions,
    ) -> Result<JobResponse, ClientError> {
        let handler = self.handler_for(service).await?;
        let timeout = self.effective_timeout(opts);
        let (request_id, job) = self.build_request(actions, opts);
        self.send_job(&handler, request_id, &job, timeout).await?;
        if job.control.suppress_response {
            return Ok(JobResponse::default());
        }
        let response = self.wait_for_response(&handler, request_id, timeout).await?;
        self.postprocess(response, opts).await
    }

    /// One single-action job per action, all in flight together to the
    /// same service. Results come back in the same order as `actions`.
    ///
    /// # Errors
    ///
    /// As [`Client::call_jobs_parallel`]; a slot-level transport error
    /// propagates unless `catch_transport_errors` is set, in which case
    /// the corresponding action response is replaced by the error.
    pub async fn call_actions_parallel(
        &self,
        service: &str,
        actions: Vec<ActionRequest>,
        opts: &CallOptions,
    ) -> Result<Vec<Result<ActionResponse, ClientError>>, ClientError> {
        let jobs = actions
            .into_iter()
            .map(|a| JobSpec {
                service: service.to_owned(),
                actions: vec![a],
            })
            .collect();
        let results = self.call_jobs_parallel(jobs, opts).await?;
        Ok(results
            .into_iter()
            .map(|slot| {
                slot.and_then(|response| {
                    response.actions.into_iter().next().ok_or_else(|| {
                        ClientError::InvalidResponse("response carried no actions".into())
                    })
                })
            })
            .collect())
    }

    /// Dispatch an arbitrary list of jobs — possibly to different
    /// services — all in flight together, and collect every response.
    ///
    /// Results are returned in the same order as `jobs`, regardless of
    /// arrival order; correlation is strictly by request id.
    ///
    /// # Errors
    ///
    /// With `catch_transport_errors` unset (the default), the first
    /// transport error propagates. With it set, each failed slot holds
    /// its error and the rest of the batch is unaffected. Job and action
    /// errors honor the raise flags either way.
    pub async fn call_jobs_parallel(
        &self,
        jobs: Vec<JobSpec>,
        opts: &CallOptions,
    ) -> Result<Vec<Result<JobResponse, ClientError>>, ClientError> {
        let timeout = self.effective_timeout(opts);
        let deadline = Instant::now() + timeout;

        // Send phase: get every job onto its queue before receiving any
        // response.
        let mut in_flight: Vec<Result<(Arc<ServiceHandler>, u64), ClientError>> =
            Vec::with_capacity(jobs.len());
        for spec in jobs {
            let sent = async {
                let handler = self.handler_for(&spec.service).await?;
                let (request_id, job) = self.build_request(spec.actions, opts);
                self.send_job(&handler, request_id, &job, timeout).await?;
                Ok((handler, request_id))
            }
            .await;
            match sent {
                Ok(pair) => in_flight.push(Ok(pair)),
                Err(e) if opts.catch_transport_errors => in_flight.push(Err(e)),
                Err(e) => return Err(e),
            }
        }

        // Receive phase: collect each response under one shared deadline.
        let mut results = Vec::with_capacity(in_flight.len());
        for slot in in_flight {
            match slot {
                Err(e) => results.push(Err(e)),
                Ok((handler, request_id)) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let received = self
                        .wait_for_response(&handler, request_id, remaining)
                        .await;
                    match received {
                        Ok(response) => {
                            results.push(self.postprocess(response, opts).await);
                        }
                        Err(e) if opts.catch_transport_errors => results.push(Err(e)),
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        // The raise flags promote the first job-level failure to a call
        // failure even in the parallel paths.
        for slot in &results {
            if let Err(e @ (ClientError::JobError { .. } | ClientError::CallActionError { .. })) =
                slot
            {
                return Err(e.clone());
            }
        }
        Ok(results)
    }

    /// Like [`Client::call_action`], but returns a handle immediately;
    /// the response is awaited through the handle.
    ///
    /// # Errors
    ///
    /// Send-side transport errors only; receive-side errors surface from
    /// [`PendingResponse::result`].
    pub async fn call_action_future(
        &self,
        service: &str,
        action: &str,
        body: Value,
        opts: &CallOptions,
    ) -> Result<PendingResponse, ClientError> {
        self.call_actions_future(service, vec![ActionRequest::with_body(action, body)], opts)
            .await
    }

    /// Like [`Client::call_actions`], but returns a handle immediately.
    ///
    /// # Errors
    ///
    /// Send-side transport errors only.
    pub async fn call_actions_future(
        &self,
        service: &str,
        actions: Vec<ActionRequest>,
        opts: &CallOptions,
    ) -> Result<PendingResponse, ClientError> {
        let handler = self.handler_for(service).await?;
        let timeout = self.effective_timeout(opts);
        let (request_id, job) = self.build_request(actions, opts);
        self.send_job(&handler, request_id, &job, timeout).await?;
        Ok(PendingResponse::new(
            self.clone(),
            service.to_owned(),
            request_id,
            timeout,
            opts.clone(),
        ))
    }

    /// Send a job without waiting for its response. Returns the request
    /// id, which later correlates the response in
    /// [`Client::get_all_responses`] — unless the options suppress the
    /// response entirely.
    ///
    /// # Errors
    ///
    /// Send-side transport errors.
    pub async fn send_request(
        &self,
        service: &str,
        actions: Vec<ActionRequest>,
        opts: &CallOptions,
    ) -> Result<u64, ClientError> {
        let handler = self.handler_for(service).await?;
        let timeout = self.effective_timeout(opts);
        let (request_id, job) = self.build_request(actions, opts);
        self.send_job(&handler, request_id, &job, timeout).await?;
        Ok(request_id)
    }

    /// Collect every response currently available for a service:
    /// anything already stashed, plus whatever arrives on the reply-to
    /// queue — waiting up to `wait` for the first arrival, then draining
    /// briefly.
    ///
    /// # Errors
    ///
    /// Receive-side transport errors.
    pub async fn get_all_responses(
        &self,
        service: &str,
        wait: Duration,
    ) -> Result<Vec<(u64, JobResponse)>, ClientError> {
        let handler = self.handler_for(service).await?;
        let mut out: Vec<(u64, JobResponse)> = handler
            .stash
            .lock()
            .await
            .drain()
            .collect();

        let _poller = handler.receive_lock.lock().await;
        let mut next_wait = if out.is_empty() {
            wait
        } else {
            DRAIN_WAIT
        };
        loop {
            match (handler.receive)(next_wait).await? {
                Some(received) => {
                    out.push((received.request_id, received.body));
                    next_wait = DRAIN_WAIT;
                }
                None => break,
            }
        }
        Ok(out)
    }

    /// Run the configured expansions over an existing response, in
    /// place. Expanding an already-expanded response is a no-op, so
    /// this is safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// As the expansion phase of [`Client::call_actions`].
    pub async fn expand(
        &self,
        response: &mut JobResponse,
        requested: &BTreeMap<String, Vec<String>>,
    ) -> Result<(), ClientError> {
        expansions::perform_expansions(self, response, requested, &self.inner.expansions).await
    }

    // -- internals ----------------------------------------------------------

    fn effective_timeout(&self, opts: &CallOptions) -> Duration {
        Duration::from_secs(opts.timeout.unwrap_or(self.inner.settings.default_timeout))
    }

    fn build_request(
        &self,
        actions: Vec<ActionRequest>,
        opts: &CallOptions,
    ) -> (u64, JobRequest) {
        let request_id = self.inner.request_counter.fetch_add(1, Ordering::Relaxed);
        let mut context = self.context.clone();
        context.request_id = request_id;
        context.switches.extend(opts.switches.iter().copied());
        context
            .extra
            .extend(opts.context_extra.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut job = JobRequest::new(actions);
        job.context = context;
        job.control.continue_on_error = opts.continue_on_error;
        job.control.suppress_response = opts.suppress_response;
        job.control.timeout = opts.timeout;
        (request_id, job)
    }

    async fn handler_for(&self, service: &str) -> Result<Arc<ServiceHandler>, ClientError> {
        let mut handlers = self.inner.handlers.lock().await;
        if let Some(h) = handlers.get(service) {
            return Ok(Arc::clone(h));
        }
        let transport = (self.inner.factory)(service).await?;
        let handler = Arc::new(ServiceHandler {
            send: self.build_send_stack(Arc::clone(&transport)),
            receive: self.build_receive_stack(transport),
            stash: Mutex::new(HashMap::new()),
            receive_lock: Mutex::new(()),
        });
        handlers.insert(service.to_owned(), Arc::clone(&handler));
        Ok(handler)
    }

    fn build_send_stack(&self, transport: Arc<dyn ClientTransport>) -> SendHandler {
        let base: SendHandler = Arc::new(move |request_id, meta, job| {
            let transport = Arc::clone(&transport);
            Box::pin(async move { transport.send_request_message(request_id, meta, &job).await })
        });
        compose(&self.inner.middleware, base, |m, next| m.wrap_send(next))
    }

    fn build_receive_stack(&self, transport: Arc<dyn ClientTransport>) -> ReceiveHandler {
        let base: ReceiveHandler = Arc::new(move |timeout| {
            let transport = Arc::clone(&transport);
            Box::pin(async move { transport.receive_response_message(timeout).await })
        });
        compose(&self.inner.middleware, base, |m, next| m.wrap_receive(next))
    }

    async fn send_job(
        &self,
        handler: &ServiceHandler,
        request_id: u64,
        job: &JobRequest,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        let meta = MessageMeta {
            expiry: Some(unix_now() + timeout.as_secs() + self.inner.settings.expiry_buffer),
            ..MessageMeta::default()
        };
        tracing::debug!(
            target: "courier.client",
            request_id,
            correlation_id = %job.context.correlation_id,
            actions = job.actions.len(),
            "dispatching job"
        );
        (handler.send)(request_id, meta, job.clone()).await?;
        Ok(())
    }

    pub(crate) async fn wait_for_service_response(
        &self,
        service: &str,
        request_id: u64,
        timeout: Duration,
    ) -> Result<JobResponse, ClientError> {
        let handler = self.handler_for(service).await?;
        self.wait_for_response(&handler, request_id, timeout).await
    }

    async fn wait_for_response(
        &self,
        handler: &ServiceHandler,
        request_id: u64,
        timeout: Duration,
    ) -> Result<JobResponse, ClientError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(response) = handler.stash.lock().await.remove(&request_id) {
                return Ok(response);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ReceiveError::Timeout(timeout).into());
            }

            // Try to become the poller; if someone else already is, loop
            // back shortly and look in the stash again.
            let guard =
                tokio::time::timeout(POLL_ROTATION.min(remaining), handler.receive_lock.lock())
                    .await;
            let _guard = match guard {
                Err(_) => continue,
                Ok(g) => g,
            };
            if let Some(response) = handler.stash.lock().await.remove(&request_id) {
                return Ok(response);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ReceiveError::Timeout(timeout).into());
            }
            match (handler.receive)(remaining).await? {
                None => continue,
                Some(received) if received.request_id == request_id => {
                    return Ok(received.body);
                }
                Some(received) => {
                    tracing::debug!(
                        target: "courier.client",
                        wanted = request_id,
                        got = received.request_id,
                        "stashing out-of-order response"
                    );
                    handler
                        .stash
                        .lock()
                        .await
                        .insert(received.request_id, received.body);
                }
            }
        }
    }

    pub(crate) async fn postprocess(
        &self,
        mut response: JobResponse,
        opts: &CallOptions,
    ) -> Result<JobResponse, ClientError> {
        if opts.raise_job_errors && !response.errors.is_empty() {
            return Err(ClientError::JobError {
                errors: response.errors,
            });
        }
        if opts.raise_action_errors && response.actions.iter().any(ActionResponse::has_errors) {
            return Err(ClientError::CallActionError {
                actions: response.actions,
            });
        }
        if !opts.expansions.is_empty() {
            expansions::perform_expansions(
                self,
                &mut response,
                &opts.expansions,
                &self.inner.expansions,
            )
            .await?;
        }
        Ok(response)
    }
}

const POLL_ROTATION: Duration = Duration::from_millis(25);
const DRAIN_WAIT: Duration = Duration::from_millis(50);
