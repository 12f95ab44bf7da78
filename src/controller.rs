//! The request lifecycle: scheduling, dispatch, timeout supervision,
//! response handling, retry and recurrence.
//!
//! Each logical request runs as one task on the controller's tokio runtime.
//! Inside that task at most one delay or timeout is pending and at most one
//! channel future is alive. Aborting the task drops the channel future, which
//! cancels the attempt. The task only holds a weak reference to the
//! controller; dropping the last handle aborts the run.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use tokio::{runtime::Handle, task::JoinHandle};

use crate::{
    classify::{classify_with, Classification},
    decode::decode_body,
    retry::{self, Backoff},
    ChannelFuture, ChannelRequest, ChannelResponse, EngineError, Environment, ErrorReason, Event, EventBus,
    EventKind, Headers, HttpChannel, LastRequest, RequestConfig, RequestDescriptor, RequestState,
    Result, Subscription, SubscriptionId, Transport, TransportChannel, TransportSelector,
    UsageError,
};

/// Builds a [`RequestController`].
pub struct ControllerBuilder {
    config: RequestConfig,
    environment: Environment,
    direct: Option<Arc<dyn TransportChannel>>,
    fallback: Option<Arc<dyn TransportChannel>>,
    runtime: Option<Handle>,
}

impl ControllerBuilder {
    fn new(config: RequestConfig) -> Self {
        Self {
            config,
            environment: Environment::native(),
            direct: Some(Arc::new(HttpChannel::new())),
            fallback: None,
            runtime: None,
        }
    }

    /// Sets the environment used for automatic transport selection.
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Replaces the default [`HttpChannel`] direct channel.
    pub fn direct_channel(mut self, channel: Arc<dyn TransportChannel>) -> Self {
        self.direct = Some(channel);
        self
    }

    /// Removes the direct channel. Attempts selecting it become invalid.
    pub fn without_direct_channel(mut self) -> Self {
        self.direct = None;
        self
    }

    /// Installs a fallback channel.
    pub fn fallback_channel(mut self, channel: Arc<dyn TransportChannel>) -> Self {
        self.fallback = Some(channel);
        self
    }

    /// Runs attempts on `runtime` instead of the ambient one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<RequestController> {
        self.config.validate()?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|err| EngineError::Runtime(err.to_string()))?,
        };
        let selector = TransportSelector::new(
            self.environment,
            self.direct.is_some(),
            self.fallback.is_some(),
        );
        Ok(RequestController {
            inner: Arc::new(Inner {
                config: self.config,
                selector,
                direct: self.direct,
                fallback: self.fallback,
                runtime,
                events: EventBus::new(),
                state: Mutex::new(AttemptState::default()),
            }),
        })
    }
}

/// Drives one polled request through attempts, retries and recurrences.
///
/// Cloning yields another handle to the same controller. Outcomes are
/// reported only through `finished` and `error` events.
#[derive(Clone)]
pub struct RequestController {
    inner: Arc<Inner>,
}

struct Inner {
    config: RequestConfig,
    selector: TransportSelector,
    direct: Option<Arc<dyn TransportChannel>>,
    fallback: Option<Arc<dyn TransportChannel>>,
    runtime: Handle,
    events: EventBus<RequestController>,
    state: Mutex<AttemptState>,
}

#[derive(Default)]
struct AttemptState {
    tries: u32,
    backoff: Backoff,
    delay_next: bool,
    descriptor: Option<RequestDescriptor>,
    last_request: Option<LastRequest>,
    phase: RequestState,
    /// Bumped on every spawn and abort. A task only mutates state while its
    /// own generation is current.
    generation: u64,
    active: Option<JoinHandle<()>>,
}

impl AttemptState {
    fn owns(&self, generation: u64) -> bool {
        self.generation == generation && self.active.is_some()
    }

    /// Ends the current run without cancelling it; the task is the caller.
    fn settle(&mut self, phase: RequestState) {
        self.active = None;
        self.phase = phase;
        self.delay_next = true;
    }
}

#[derive(Clone, Copy, Debug)]
enum Entry {
    Start,
    Retry,
}

enum Outcome {
    Completed(ChannelResponse),
    TimedOut,
    NotDispatched,
}

enum Attempt {
    Open {
        response: ChannelFuture,
        timeout: Duration,
    },
    NotDispatched,
}

enum Verdict {
    Retry,
    Fail(ErrorReason),
    Finish {
        code: u16,
        body: String,
        headers: Headers,
        recur: bool,
    },
}

impl fmt::Debug for RequestController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("RequestController")
            .field("config", &self.inner.config)
            .field("state", &state.phase)
            .field("tries", &state.tries)
            .finish()
    }
}

impl RequestController {
    /// Builds a controller with the default direct channel on the ambient
    /// tokio runtime.
    pub fn new(config: RequestConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: RequestConfig) -> ControllerBuilder {
        ControllerBuilder::new(config)
    }

    /// Starts a logical request.
    ///
    /// Rejected while a run is scheduled or in flight; the rejection is
    /// logged and returned, and nothing else happens.
    pub fn start(&self, descriptor: RequestDescriptor) -> std::result::Result<(), UsageError> {
        let mut state = self.inner.lock();
        if state.active.is_some() {
            return Err(usage(UsageError::AlreadyRunning));
        }
        state.descriptor = Some(descriptor);
        self.inner.spawn_run(&mut state, Entry::Start);
        Ok(())
    }

    /// Schedules another attempt of the last request after the usual backoff.
    ///
    /// Only allowed between runs, after at least one attempt.
    pub fn retry(&self) -> std::result::Result<(), UsageError> {
        let mut state = self.inner.lock();
        if state.tries == 0 || state.descriptor.is_none() {
            return Err(usage(UsageError::NeverStarted));
        }
        if state.active.is_some() {
            return Err(usage(UsageError::RetryWhileRunning));
        }
        self.inner.spawn_run(&mut state, Entry::Retry);
        Ok(())
    }

    /// Cancels any pending delay or in-flight attempt. Emits no event.
    pub fn abort(&self) {
        let task = {
            let mut state = self.inner.lock();
            state.generation += 1;
            let task = state.active.take();
            if task.is_some() {
                state.phase = RequestState::Aborted;
                tracing::debug!("request aborted");
            }
            task
        };
        if let Some(task) = task {
            task.abort();
        }
    }

    /// Registers an event handler.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription<RequestController>
    where
        F: Fn(&RequestController, &Event) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, handler)
    }

    /// Removes one handler, or all handlers of `kind` when `id` is `None`.
    pub fn off(&self, kind: EventKind, id: Option<SubscriptionId>) {
        self.inner.events.off(kind, id);
    }

    pub fn config(&self) -> &RequestConfig {
        &self.inner.config
    }

    pub fn state(&self) -> RequestState {
        self.inner.lock().phase
    }

    /// Attempts dispatched in the current logical request.
    pub fn tries_so_far(&self) -> u32 {
        self.inner.lock().tries
    }

    /// The most recent dispatch, cleared while the next one is pending.
    pub fn last_request(&self) -> Option<LastRequest> {
        self.inner.lock().last_request.clone()
    }
}

fn usage(err: UsageError) -> UsageError {
    tracing::error!("{err}");
    err
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, AttemptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_run(self: &Arc<Self>, state: &mut AttemptState, entry: Entry) {
        state.generation += 1;
        let generation = state.generation;
        let task = self.runtime.spawn(run(Arc::downgrade(self), entry, generation));
        state.active = Some(task);
        state.phase = match entry {
            Entry::Start => RequestState::Scheduled,
            Entry::Retry => RequestState::RetryScheduled,
        };
    }

    fn controller(self: &Arc<Self>) -> RequestController {
        RequestController {
            inner: Arc::clone(self),
        }
    }

    /// Computes the delay before the next attempt and marks the run scheduled.
    fn schedule(&self, entry: Entry, generation: u64) -> Option<Duration> {
        let mut state = self.lock();
        if !state.owns(generation) {
            return None;
        }
        state.last_request = None;
        let delay = match entry {
            Entry::Start => {
                state.tries = 0;
                state.phase = RequestState::Scheduled;
                if state.delay_next {
                    state.delay_next = false;
                    let delay = retry::jitter(self.config.max_delay_ms);
                    tracing::info!("polling again in {}ms", delay.as_millis());
                    delay
                } else {
                    Duration::ZERO
                }
            }
            Entry::Retry => {
                state.phase = RequestState::RetryScheduled;
                let tries = state.tries;
                let delay = state.backoff.next_delay(tries, self.config.max_delay_ms);
                tracing::info!("trying again in {}ms", delay.as_millis());
                delay
            }
        };
        Some(delay)
    }

    /// Counts the attempt and snapshots what to send.
    fn begin_attempt(&self, generation: u64) -> Option<RequestDescriptor> {
        let mut state = self.lock();
        if !state.owns(generation) {
            return None;
        }
        let descriptor = state.descriptor.clone()?;
        state.tries += 1;
        state.phase = RequestState::Connecting;
        Some(descriptor)
    }

    /// Opens the channel for one attempt. The returned future does not
    /// borrow the controller.
    fn dispatch(&self, generation: u64) -> Option<Attempt> {
        let descriptor = self.begin_attempt(generation)?;
        // Resolved outside the lock: a provider may call back into the controller.
        let url = self.selector.resolve(&descriptor.target.resolve());
        let transport = self.selector.choose(self.config.transport, &url);

        {
            let mut state = self.lock();
            if !state.owns(generation) {
                return None;
            }
            state.last_request = Some(LastRequest {
                method: descriptor.method.clone(),
                url: url.clone(),
                headers: descriptor.headers.clone(),
                body: descriptor.body.clone(),
                transport,
            });
        }

        let channel = match transport {
            Transport::Direct => self.direct.as_ref(),
            Transport::Fallback => self.fallback.as_ref(),
            Transport::Invalid => None,
        };
        let Some(channel) = channel else {
            tracing::error!(url = %url, mode = ?self.config.transport, "invalid transport");
            return Some(Attempt::NotDispatched);
        };

        tracing::debug!(url = %url, transport = ?transport, "attempt start");
        let response = channel.open(ChannelRequest {
            method: descriptor.method,
            url,
            headers: descriptor.headers,
            body: descriptor.body,
            credentialed: self.config.credentialed,
        });
        Some(Attempt::Open {
            response,
            timeout: Duration::from_millis(self.config.timeout_ms),
        })
    }

    /// Decides what follows an attempt. Terminal verdicts leave the
    /// controller idle before any event is emitted.
    fn judge(&self, outcome: Outcome, generation: u64) -> Option<Verdict> {
        let mut state = self.lock();
        if !state.owns(generation) {
            return None;
        }
        let may_retry = retry::permits_retry(state.tries, self.config.max_tries);

        let verdict = match outcome {
            Outcome::NotDispatched => Verdict::Fail(ErrorReason::Transport),
            Outcome::TimedOut if may_retry => Verdict::Retry,
            Outcome::TimedOut => Verdict::Fail(ErrorReason::Timeout),
            Outcome::Completed(response) => {
                match classify_with(response.code, &self.config.error_codes) {
                    Classification::Retryable if may_retry => Verdict::Retry,
                    Classification::Retryable => Verdict::Fail(ErrorReason::Transport),
                    classification => Verdict::Finish {
                        code: response.code,
                        body: response.body,
                        headers: response.headers,
                        recur: self.config.recurring
                            && classification == Classification::Success,
                    },
                }
            }
        };

        match &verdict {
            Verdict::Retry => state.phase = RequestState::RetryScheduled,
            Verdict::Fail(_) => state.settle(RequestState::Failed),
            Verdict::Finish { .. } => state.settle(RequestState::Succeeded),
        }
        Some(verdict)
    }

    /// Begins the next recurrence unless a handler already started or
    /// aborted the controller.
    fn recur(self: &Arc<Self>, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation && state.active.is_none() {
            self.spawn_run(&mut state, Entry::Start);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = state.active.take() {
            tracing::debug!("controller dropped, cancelling run");
            task.abort();
        }
    }
}

async fn run(this: Weak<Inner>, mut entry: Entry, generation: u64) {
    loop {
        let Some(delay) = this
            .upgrade()
            .and_then(|inner| inner.schedule(entry, generation))
        else {
            return;
        };
        tokio::time::sleep(delay).await;

        let Some(attempt) = this
            .upgrade()
            .and_then(|inner| inner.dispatch(generation))
        else {
            return;
        };
        let outcome = match attempt {
            Attempt::NotDispatched => Outcome::NotDispatched,
            Attempt::Open { response, timeout } => {
                match tokio::time::timeout(timeout, response).await {
                    Ok(response) => Outcome::Completed(response),
                    Err(_) => {
                        tracing::debug!("attempt timed out");
                        Outcome::TimedOut
                    }
                }
            }
        };

        let Some(inner) = this.upgrade() else {
            return;
        };
        match inner.judge(outcome, generation) {
            None => return,
            Some(Verdict::Retry) => entry = Entry::Retry,
            Some(Verdict::Fail(reason)) => {
                tracing::debug!(%reason, "request failed");
                inner
                    .events
                    .trigger(&inner.controller(), &Event::Error { reason });
                return;
            }
            Some(Verdict::Finish {
                code,
                body,
                headers,
                recur,
            }) => {
                let result = decode_body(body, inner.config.raw_response);
                inner.events.trigger(
                    &inner.controller(),
                    &Event::Finished {
                        code,
                        result,
                        headers,
                    },
                );
                if recur {
                    inner.recur(generation);
                }
                return;
            }
        }
    }
}
