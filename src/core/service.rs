//! # Service: the supervised node of a tree.
//!
//! A [`Service`] owns ordered children, a task group, a readiness gate, a stop
//! signal and a fault-handler table. Its behavior comes from a [`Lifecycle`]
//! implementation; the engine here enforces ordering and teardown.
//!
//! ## State machine
//! ```text
//!            start()                 do_start ok            stop()
//! Stopped ───────────► Starting ─────────────────► Running ─────────► Stopping ──► Stopped
//!    ▲                    │ any fault                                     ▲
//!    │                    └──────────────── stop() ──────────────────────┘
//! ```
//!
//! ## Start
//! ```text
//! start(block_until_ready)
//!   ├─► reject if Starting/Running (AlreadyStarted) or Stopping
//!   ├─► clear stop signal + readiness gate
//!   ├─► pre_start
//!   ├─► children in list order: start(block_until_ready) if stopped
//!   ├─► do_start ─► Ready   ─► open gate
//!   │            └► Pending ─► (blocking) wait ready_timeout, not a fault
//!   ├─► Running; post_start
//!   ├─► any fault in the steps above ─► stop() ─► re-raise
//!   └─► a stop took over (checked after every await) ─► Stopping error
//! ```
//!
//! ## Stop
//! ```text
//! stop(timeout)
//!   ├─► called from one of our (or a descendant's) tasks ─► re-dispatch, return Deferred
//!   ├─► Stopping (is_started() is false from here on)
//!   │     └─► already Stopping ─► wait for that stop, return Completed
//!   ├─► pre_stop ─► children in reverse order (unless stopped) ─► do_stop
//!   └─► always: cancel token ─► join(timeout) ─► kill(kill_grace)
//!              ─► clear gate ─► Stopped ─► stop signal ─► post_stop
//! ```

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::core::adapter::{Component, ComponentAdapter};
use crate::core::config::ServiceConfig;
use crate::core::gate::{ReadyGate, StopSignal};
use crate::core::group::{TaskExit, TaskGroup, TaskHandle};
use crate::core::intercept::{Caught, FaultKind, Handler, HandlerTable, Registration};
use crate::core::lifecycle::{Lifecycle, Readiness};
use crate::core::shutdown;
use crate::error::{Fault, ServiceError, TaskPanic};
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Lifecycle state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    /// Initial and terminal state.
    Stopped = 0,
    /// `start` is running its sequence.
    Starting = 1,
    /// Start completed; the service reports as started.
    Running = 2,
    /// `stop` is tearing the service down.
    Stopping = 3,
}

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => State::Starting,
            2 => State::Running,
            3 => State::Stopping,
            _ => State::Stopped,
        }
    }
}

/// Result of a successful `stop` call.
#[derive(Debug)]
pub enum Stop {
    /// The stop sequence ran to completion.
    Completed,
    /// `stop` was called from inside one of the service's own tasks; the stop
    /// runs on an independent task whose handle is returned.
    Deferred(JoinHandle<Result<(), ServiceError>>),
}

struct Inner {
    name: Arc<str>,
    config: ServiceConfig,
    hooks: Arc<dyn Lifecycle>,
    concrete: Arc<dyn Any + Send + Sync>,
    state: AtomicU8,
    parent: Mutex<Weak<Inner>>,
    children: Mutex<Vec<Service>>,
    ready: ReadyGate,
    stopped: StopSignal,
    tasks: TaskGroup,
    handlers: HandlerTable,
    token: Mutex<CancellationToken>,
    bus: watch::Sender<Bus>,
    subscribers: Mutex<Vec<Arc<dyn Subscribe>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    /// Closed when the stop that currently owns `Stopping` returns.
    inflight_stop: Mutex<Option<watch::Receiver<()>>>,
}

impl Inner {
    fn publish(&self, ev: Event) {
        self.bus.borrow().publish(ev.with_service(Arc::clone(&self.name)));
    }

    fn on_task_fault(&self, fault: Fault) -> TaskExit {
        match self.handlers.intercept(&self.name, fault) {
            Ok(original) => {
                self.publish(Event::new(EventKind::FaultHandled).with_reason(original.to_string()));
                TaskExit::Handled(original)
            }
            Err(escaped) => {
                tracing::error!(service = %self.name, error = %escaped, "unhandled fault in background task");
                self.publish(Event::new(EventKind::TaskFailed).with_reason(escaped.to_string()));
                TaskExit::Failed(escaped)
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}

/// Runs one unit of supervised work and routes its fault, if any.
async fn supervise<Fut>(owner: Weak<Inner>, fut: Fut) -> TaskExit
where
    Fut: Future<Output = Result<(), Fault>> + Send,
{
    let fault = match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => return TaskExit::Completed,
        Ok(Err(fault)) => fault,
        Err(panic) => Box::new(TaskPanic::from_payload(panic)) as Fault,
    };
    match owner.upgrade() {
        Some(inner) => inner.on_task_fault(fault),
        None => {
            tracing::error!(error = %fault, "unhandled fault in a task of a dropped service");
            TaskExit::Failed(fault)
        }
    }
}

/// Stops the service on a fresh task if dropped while armed.
///
/// Covers callers whose future is cancelled while they hold a started service
/// (`run_forever`, `scope`).
struct StopOnDrop {
    service: Option<Service>,
    timeout: Duration,
}

impl StopOnDrop {
    fn new(service: Service, timeout: Duration) -> Self {
        Self {
            service: Some(service),
            timeout,
        }
    }

    fn disarm(mut self) {
        self.service = None;
    }
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        let Some(service) = self.service.take() else {
            return;
        };
        if !service.is_started() {
            return;
        }
        let timeout = self.timeout;
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    if let Err(err) = service.stop_within(timeout).await {
                        tracing::error!(service = %service.name(), error = %err, "stop after cancellation failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(service = %service.name(), "dropped outside a runtime while started; not stopped");
            }
        }
    }
}

/// Builder for a [`Service`] with non-default configuration or subscribers.
///
/// ```
/// use std::time::Duration;
/// use servisor::{Service, ServiceBuilder};
///
/// let svc: Service = ServiceBuilder::new("api")
///     .stop_timeout(Duration::from_millis(250))
///     .ready_timeout(Duration::from_secs(5))
///     .build(());
/// assert_eq!(svc.config().stop_timeout, Duration::from_millis(250));
/// ```
pub struct ServiceBuilder {
    name: Arc<str>,
    config: ServiceConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl ServiceBuilder {
    /// Starts a builder with default configuration.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            config: ServiceConfig::default(),
            subscribers: Vec::new(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the cooperative join window of `stop`.
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.config.stop_timeout = timeout;
        self
    }

    /// Sets how long a blocking start waits for readiness.
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.config.ready_timeout = timeout;
        self
    }

    /// Sets how long `stop` waits for aborted tasks.
    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.config.kill_grace = grace;
        self
    }

    /// Enables or disables OS signal handling in `run_forever`.
    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.config.handle_signals = enabled;
        self
    }

    /// Makes `run_forever` shut the tree down on unhandled task faults.
    pub fn escalate_unhandled(mut self, enabled: bool) -> Self {
        self.config.escalate_unhandled = enabled;
        self
    }

    /// Attaches event subscribers.
    ///
    /// They observe this service's bus, i.e. the whole tree when attached to
    /// the root. Delivery starts with the first `start` and moves to the
    /// parent's bus if the service is attached later.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the service around `hooks`.
    pub fn build<L: Lifecycle>(self, hooks: L) -> Service {
        let hooks = Arc::new(hooks);
        let concrete: Arc<dyn Any + Send + Sync> = hooks.clone();
        let bus = Bus::new(self.config.bus_capacity);
        Service {
            inner: Arc::new(Inner {
                name: self.name,
                config: self.config,
                hooks,
                concrete,
                state: AtomicU8::new(State::Stopped as u8),
                parent: Mutex::new(Weak::new()),
                children: Mutex::new(Vec::new()),
                ready: ReadyGate::new(),
                stopped: StopSignal::new(),
                tasks: TaskGroup::new(),
                handlers: HandlerTable::new(),
                token: Mutex::new(CancellationToken::new()),
                bus: watch::channel(bus).0,
                subscribers: Mutex::new(self.subscribers),
                listener: Mutex::new(None),
                inflight_stop: Mutex::new(None),
            }),
        }
    }
}

/// Handle to a supervised node. Cheap to clone; clones refer to the same node.
#[derive(Clone)]
pub struct Service {
    inner: Arc<Inner>,
}

impl Service {
    /// Creates a service with default configuration.
    pub fn new<L: Lifecycle>(name: impl Into<Arc<str>>, hooks: L) -> Self {
        ServiceBuilder::new(name).build(hooks)
    }

    /// Creates a service that only groups children and tasks.
    pub fn container(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, ())
    }

    /// Starts a [`ServiceBuilder`].
    pub fn builder(name: impl Into<Arc<str>>) -> ServiceBuilder {
        ServiceBuilder::new(name)
    }

    /// Name of the service.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Configuration of the service.
    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        State::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// True between a completed start and the beginning of the next stop.
    pub fn is_started(&self) -> bool {
        self.state() == State::Running
    }

    /// True if both handles refer to the same node.
    pub fn ptr_eq(&self, other: &Service) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The concrete hooks object, if it is an `L`.
    pub fn downcast<L: Lifecycle>(&self) -> Option<Arc<L>> {
        Arc::clone(&self.inner.concrete).downcast::<L>().ok()
    }

    // ---------------------------
    // Readiness
    // ---------------------------

    /// True once the service declared itself ready in the current cycle.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.is_ready()
    }

    /// Opens the readiness gate (idempotent).
    pub fn set_ready(&self) {
        if self.inner.ready.set_ready() {
            self.inner.publish(Event::new(EventKind::ServiceReady));
        }
    }

    /// Waits up to `timeout` for readiness; returns the readiness at return.
    ///
    /// A timeout is not an error.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        self.inner.ready.wait_ready(timeout).await
    }

    /// The readiness gate itself.
    pub fn ready_gate(&self) -> &ReadyGate {
        &self.inner.ready
    }

    /// Guards an operation that needs a ready service.
    ///
    /// Waits up to `ready_timeout`, then fails with [`ServiceError::NotReady`]
    /// if the gate is still closed.
    pub async fn require_ready(&self) -> Result<(), ServiceError> {
        let timeout = self.inner.config.ready_timeout;
        if self.wait_ready(timeout).await {
            Ok(())
        } else {
            Err(ServiceError::NotReady {
                service: self.name().to_string(),
                timeout,
            })
        }
    }

    /// Waits until the current cycle's stop has completed.
    pub async fn wait_stopped(&self) {
        self.inner.stopped.wait().await;
    }

    // ---------------------------
    // Composition
    // ---------------------------

    /// Snapshot of the children, in start order.
    pub fn children(&self) -> Vec<Service> {
        self.inner.children.lock().clone()
    }

    /// Parent of this service, if attached.
    pub fn parent(&self) -> Option<Service> {
        self.inner.parent.lock().upgrade().map(|inner| Service { inner })
    }

    /// Appends `child`; it starts after the children added before it and
    /// stops before them.
    ///
    /// The child switches to this service's event bus. Fault handlers already
    /// registered here are **not** applied to it.
    pub fn add_service(&self, child: Service) -> Result<(), ServiceError> {
        if self.ptr_eq(&child) || self.has_ancestor(&child) {
            return Err(ServiceError::Cycle {
                child: child.name().to_string(),
                parent: self.name().to_string(),
            });
        }
        {
            let mut parent = child.inner.parent.lock();
            if let Some(current) = parent.upgrade() {
                return Err(ServiceError::AlreadyAttached {
                    child: child.name().to_string(),
                    parent: current.name.to_string(),
                });
            }
            *parent = Arc::downgrade(&self.inner);
        }
        child.adopt_bus(&self.bus());
        self.inner.children.lock().push(child);
        Ok(())
    }

    /// Wraps a foreign component and appends it as a child.
    ///
    /// Returns the adapter service.
    pub fn add_component<C: Component>(
        &self,
        name: impl Into<Arc<str>>,
        component: C,
    ) -> Result<Service, ServiceError> {
        let adapter = ComponentAdapter::service(name, component);
        self.add_service(adapter.clone())?;
        Ok(adapter)
    }

    /// Detaches `child`. Returns `false` if it was not a child of this service.
    pub fn remove_service(&self, child: &Service) -> bool {
        let removed = {
            let mut children = self.inner.children.lock();
            let before = children.len();
            children.retain(|c| !c.ptr_eq(child));
            children.len() != before
        };
        if removed {
            *child.inner.parent.lock() = Weak::new();
            child.adopt_bus(&Bus::new(child.inner.config.bus_capacity));
        }
        removed
    }

    fn has_ancestor(&self, candidate: &Service) -> bool {
        let mut cur = self.parent();
        while let Some(p) = cur {
            if p.ptr_eq(candidate) {
                return true;
            }
            cur = p.parent();
        }
        false
    }

    fn adopt_bus(&self, bus: &Bus) {
        self.inner.bus.send_replace(bus.clone());
        for child in self.children() {
            child.adopt_bus(bus);
        }
    }

    // ---------------------------
    // Events
    // ---------------------------

    /// The event bus this service publishes on.
    pub fn bus(&self) -> Bus {
        self.inner.bus.borrow().clone()
    }

    /// Receiver for events published from now on by this service and, when
    /// it is a root, by its whole tree.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.bus.borrow().subscribe()
    }

    fn ensure_listener(&self) {
        let subs = std::mem::take(&mut *self.inner.subscribers.lock());
        if subs.is_empty() {
            return;
        }
        // Attaching the service to a parent later swaps its bus; the listener
        // then moves its subscription to the new bus.
        let mut buses = self.inner.bus.subscribe();
        let bus = buses.borrow_and_update().clone();
        let mut rx = bus.subscribe();
        let mut set = SubscriberSet::new(subs.clone(), bus);
        let name = Arc::clone(&self.inner.name);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Drain the old bus before moving off it.
                    biased;
                    res = rx.recv() => match res {
                        Ok(ev) => set.emit(&ev),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(service = %name, skipped, "event listener lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    changed = buses.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let bus = buses.borrow_and_update().clone();
                        rx = bus.subscribe();
                        let old = std::mem::replace(&mut set, SubscriberSet::new(subs.clone(), bus));
                        old.shutdown().await;
                        tracing::debug!(service = %name, "event listener moved to a new bus");
                    }
                }
            }
            set.shutdown().await;
        });
        *self.inner.listener.lock() = Some(handle);
    }

    // ---------------------------
    // Faults
    // ---------------------------

    /// Handles faults of kind `E` raised in tasks of this service and of every
    /// current descendant.
    ///
    /// Children attached later do not inherit the registration.
    pub fn catch<E, F>(&self, handler: F)
    where
        E: Error + 'static,
        F: Fn(&Caught<'_>) -> Result<(), Fault> + Send + Sync + 'static,
    {
        self.catch_kind(FaultKind::of::<E>(), Arc::new(handler));
    }

    /// Handles every fault not matched by an earlier registration.
    pub fn catch_any<F>(&self, handler: F)
    where
        F: Fn(&Caught<'_>) -> Result<(), Fault> + Send + Sync + 'static,
    {
        self.catch_kind(FaultKind::any(), Arc::new(handler));
    }

    /// Registers `handler` for `kind` here and on every current descendant.
    pub fn catch_kind(&self, kind: FaultKind, handler: Handler) {
        self.register(Registration {
            kind,
            handler,
            registered_by: task::try_id(),
        });
    }

    fn register(&self, reg: Registration) {
        self.inner.handlers.register(reg.clone());
        for child in self.children() {
            child.register(reg.clone());
        }
    }

    // ---------------------------
    // Tasks
    // ---------------------------

    /// Token cancelled when the current cycle's stop reaches its join phase.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.token.lock().clone()
    }

    /// Number of running tasks owned by this service.
    pub fn task_count(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Spawns supervised work.
    ///
    /// `f` receives the current cycle's cancellation token. A fault returned
    /// (or a panic raised) by the work is matched against the handlers
    /// registered at the time it happens.
    pub fn spawn<F, Fut>(&self, f: F) -> TaskHandle
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), Fault>> + Send + 'static,
    {
        let fut = f(self.cancellation_token());
        self.inner
            .tasks
            .spawn(supervise(Arc::downgrade(&self.inner), fut))
    }

    /// Spawns supervised work that starts after `delay`.
    ///
    /// The task belongs to the group immediately. If the token is cancelled
    /// during the delay the work never runs.
    pub fn spawn_later<F, Fut>(&self, delay: Duration, f: F) -> TaskHandle
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), Fault>> + Send + 'static,
    {
        let ctx = self.cancellation_token();
        let fut = f(ctx.clone());
        let delayed = async move {
            tokio::select! {
                _ = ctx.cancelled() => Ok(()),
                _ = tokio::time::sleep(delay) => fut.await,
            }
        };
        self.inner
            .tasks
            .spawn(supervise(Arc::downgrade(&self.inner), delayed))
    }

    fn owns_task(&self, id: task::Id) -> bool {
        self.inner.tasks.contains(id) || self.children().iter().any(|c| c.owns_task(id))
    }

    fn owns_current_task(&self) -> bool {
        task::try_id().is_some_and(|id| self.owns_task(id))
    }

    // ---------------------------
    // Lifecycle
    // ---------------------------

    fn hook_error(&self, hook: &'static str, source: Fault) -> ServiceError {
        ServiceError::Hook {
            service: self.name().to_string(),
            hook,
            source,
        }
    }

    /// Starts the service and its children, blocking until ready.
    pub async fn start(&self) -> Result<(), ServiceError> {
        self.start_with(true).await
    }

    /// Starts the service and its children.
    ///
    /// With `block_until_ready`, services whose `do_start` returned
    /// [`Readiness::Pending`] are waited for up to their `ready_timeout`.
    pub fn start_with(&self, block_until_ready: bool) -> BoxFuture<'_, Result<(), ServiceError>> {
        async move {
            self.begin_start()?;
            self.inner.stopped.clear();
            self.inner.ready.clear();
            self.ensure_listener();
            self.inner.publish(Event::new(EventKind::ServiceStarting));

            let err = match self.run_start(block_until_ready).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            self.inner
                .publish(Event::new(EventKind::StartFailed).with_reason(err.to_string()));
            if !matches!(self.state(), State::Starting | State::Running) {
                // A concurrent stop owns this cycle. Once it returns, sweep
                // whatever this start brought up after it had passed by.
                self.await_inflight_stop().await;
                if !self.has_leftovers() {
                    return Err(err);
                }
            }
            match self.stop().await {
                Ok(_) => Err(err),
                Err(teardown) => Err(ServiceError::StartAborted {
                    source: Box::new(err),
                    teardown: Box::new(teardown),
                }),
            }
        }
        .boxed()
    }

    fn begin_start(&self) -> Result<(), ServiceError> {
        let swapped = self.inner.state.compare_exchange(
            State::Stopped as u8,
            State::Starting as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        match swapped.map_err(State::from_u8) {
            Ok(_) => Ok(()),
            Err(State::Stopping) => Err(ServiceError::Stopping {
                service: self.name().to_string(),
            }),
            Err(_) => Err(ServiceError::AlreadyStarted {
                service: self.name().to_string(),
            }),
        }
    }

    async fn run_start(&self, block_until_ready: bool) -> Result<(), ServiceError> {
        let hooks = Arc::clone(&self.inner.hooks);
        hooks
            .pre_start(self)
            .await
            .map_err(|e| self.hook_error("pre_start", e))?;

        for child in self.children() {
            self.ensure_starting()?;
            if child.state() == State::Stopped {
                child.start_with(block_until_ready).await?;
            }
        }

        self.ensure_starting()?;
        let readiness = hooks
            .do_start(self)
            .await
            .map_err(|e| self.hook_error("do_start", e))?;
        match readiness {
            Readiness::Ready => self.set_ready(),
            Readiness::Pending if block_until_ready => {
                let timeout = self.inner.config.ready_timeout;
                let token = self.cancellation_token();
                let ready = tokio::select! {
                    ready = self.wait_ready(timeout) => ready,
                    _ = token.cancelled() => return Err(self.stopping_error()),
                };
                if !ready {
                    tracing::warn!(service = %self.name(), ?timeout, "not ready within timeout");
                    self.inner
                        .publish(Event::new(EventKind::ReadyTimeout).with_timeout(timeout));
                }
            }
            Readiness::Pending => {}
        }

        let marked = self.inner.state.compare_exchange(
            State::Starting as u8,
            State::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if marked.is_err() {
            return Err(self.stopping_error());
        }
        self.inner.publish(Event::new(EventKind::ServiceStarted));

        hooks
            .post_start(self)
            .await
            .map_err(|e| self.hook_error("post_start", e))
    }

    fn stopping_error(&self) -> ServiceError {
        ServiceError::Stopping {
            service: self.name().to_string(),
        }
    }

    /// Fails once a stop has taken over the cycle this start belongs to.
    fn ensure_starting(&self) -> Result<(), ServiceError> {
        if self.state() == State::Starting {
            Ok(())
        } else {
            Err(self.stopping_error())
        }
    }

    fn has_leftovers(&self) -> bool {
        !self.inner.tasks.is_empty()
            || self.children().iter().any(|c| c.state() != State::Stopped)
    }

    /// Claims the `Stopping` state for this call.
    ///
    /// Returns the guard the winner holds until its stop returns, or the
    /// receiver of the stop already in flight.
    fn begin_stop(&self) -> Result<watch::Sender<()>, watch::Receiver<()>> {
        let mut inflight = self.inner.inflight_stop.lock();
        let prev = self
            .inner
            .state
            .swap(State::Stopping as u8, Ordering::AcqRel);
        if State::from_u8(prev) == State::Stopping {
            if let Some(done) = inflight.as_ref() {
                return Err(done.clone());
            }
        }
        let (tx, rx) = watch::channel(());
        *inflight = Some(rx);
        Ok(tx)
    }

    async fn await_inflight_stop(&self) {
        let done = self.inner.inflight_stop.lock().clone();
        if let Some(mut done) = done {
            // Never sent on; resolves when the owning stop drops its sender.
            let _ = done.changed().await;
        }
    }

    /// Stops the service within its configured `stop_timeout`.
    pub async fn stop(&self) -> Result<Stop, ServiceError> {
        self.stop_within(self.inner.config.stop_timeout).await
    }

    /// Stops the service: hooks, children in reverse order, then its tasks.
    ///
    /// Tasks get `timeout` to finish after their token is cancelled; survivors
    /// are aborted and awaited for `kill_grace`. The task teardown, the stop
    /// signal and `post_stop` run even when an earlier step failed; the first
    /// fault is returned.
    ///
    /// A call made while another stop is in flight waits for that stop and
    /// returns [`Stop::Completed`] without repeating the sequence.
    pub fn stop_within(&self, timeout: Duration) -> BoxFuture<'_, Result<Stop, ServiceError>> {
        async move {
            if self.owns_current_task() {
                let svc = self.clone();
                let handle =
                    tokio::spawn(async move { svc.stop_within(timeout).await.map(|_| ()) });
                return Ok(Stop::Deferred(handle));
            }

            let _owner = match self.begin_stop() {
                Ok(owner) => owner,
                Err(mut done) => {
                    // Another stop owns this cycle; its completion is ours.
                    let _ = done.changed().await;
                    return Ok(Stop::Completed);
                }
            };
            self.inner.publish(Event::new(EventKind::ServiceStopping));

            let result = self.run_stop().await;
            self.teardown(timeout).await;
            let post = self
                .inner
                .hooks
                .post_stop(self)
                .await
                .map_err(|e| self.hook_error("post_stop", e));
            let result = result.and(post);

            let mut ev = Event::new(EventKind::ServiceStopped);
            if let Err(err) = &result {
                ev = ev.with_reason(err.to_string());
            }
            self.inner.publish(ev);
            result.map(|()| Stop::Completed)
        }
        .boxed()
    }

    async fn run_stop(&self) -> Result<(), ServiceError> {
        let hooks = Arc::clone(&self.inner.hooks);
        hooks
            .pre_stop(self)
            .await
            .map_err(|e| self.hook_error("pre_stop", e))?;

        for child in self.children().iter().rev() {
            if child.state() != State::Stopped {
                child.stop().await?;
            }
        }

        hooks
            .do_stop(self)
            .await
            .map_err(|e| self.hook_error("do_stop", e))
    }

    async fn teardown(&self, timeout: Duration) {
        let inner = &self.inner;
        inner.token.lock().cancel();

        if !inner.tasks.join_all(timeout).await {
            let survivors = inner.tasks.len();
            tracing::warn!(service = %inner.name, survivors, ?timeout, "tasks still running after stop timeout");
            inner.publish(
                Event::new(EventKind::GraceExceeded)
                    .with_timeout(timeout)
                    .with_tasks(survivors),
            );

            let alive = inner.tasks.kill_all(inner.config.kill_grace).await;
            let mut ev = Event::new(EventKind::TasksKilled).with_tasks(survivors);
            if alive > 0 {
                tracing::error!(service = %inner.name, alive, "tasks did not terminate within kill grace");
                ev = ev.with_reason(format!("{alive} task(s) still alive after kill grace"));
            }
            inner.publish(ev);
        }

        inner.ready.clear();
        *inner.token.lock() = CancellationToken::new();
        inner.state.store(State::Stopped as u8, Ordering::Release);
        inner.stopped.set();
    }

    /// Reloads the children in list order, then this service.
    ///
    /// No state transition happens.
    pub fn reload(&self) -> BoxFuture<'_, Result<(), ServiceError>> {
        async move {
            for child in self.children() {
                child.reload().await?;
            }
            self.inner
                .hooks
                .do_reload(self)
                .await
                .map_err(|e| self.hook_error("do_reload", e))?;
            self.inner.publish(Event::new(EventKind::ServiceReloaded));
            Ok(())
        }
        .boxed()
    }

    /// Starts the service if needed, then waits until it is stopped.
    ///
    /// `ready_callback` runs once after this call started the service. The
    /// wait ends with an error, after stopping the tree within `stop_timeout`
    /// (default: the configured one), when:
    /// - an OS termination signal arrives (`handle_signals`),
    /// - a task anywhere in the tree fails unhandled (`escalate_unhandled`).
    ///
    /// If that stop fails too, both errors come back in
    /// [`ServiceError::ShutdownAborted`].
    ///
    /// Dropping the returned future while waiting also stops the service.
    pub async fn run_forever(
        &self,
        stop_timeout: Option<Duration>,
        ready_callback: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<(), ServiceError> {
        let stop_timeout = stop_timeout.unwrap_or(self.inner.config.stop_timeout);
        let mut events = self.subscribe();

        if !self.is_started() {
            self.start().await?;
            if let Some(callback) = ready_callback {
                callback();
            }
        }

        let guard = StopOnDrop::new(self.clone(), stop_timeout);
        let handle_signals = self.inner.config.handle_signals;
        let escalate = self.inner.config.escalate_unhandled;

        let cause = tokio::select! {
            _ = self.wait_stopped() => None,
            signal = termination_signal(), if handle_signals => {
                self.inner.publish(Event::new(EventKind::ShutdownRequested).with_reason(signal));
                Some(ServiceError::Interrupted {
                    service: self.name().to_string(),
                    signal,
                })
            }
            err = next_unhandled(&mut events), if escalate => Some(err),
        };
        guard.disarm();

        let Some(cause) = cause else {
            return Ok(());
        };
        match self.stop_within(stop_timeout).await {
            Ok(_) => Err(cause),
            Err(teardown) => {
                tracing::error!(service = %self.name(), error = %teardown, "teardown after interruption failed");
                Err(ServiceError::ShutdownAborted {
                    source: Box::new(cause),
                    teardown: Box::new(teardown),
                })
            }
        }
    }

    /// Runs `f` with the service started and stops it on every exit path.
    ///
    /// The service is stopped when `f` returns, when it panics (the panic is
    /// resumed afterwards), and when the returned future is dropped early.
    pub async fn scope<F, Fut, T>(&self, f: F) -> Result<T, ServiceError>
    where
        F: FnOnce(Service) -> Fut,
        Fut: Future<Output = T>,
    {
        self.start().await?;
        let guard = StopOnDrop::new(self.clone(), self.inner.config.stop_timeout);
        let out = AssertUnwindSafe(f(self.clone())).catch_unwind().await;
        guard.disarm();

        let stopped = self.stop().await;
        match out {
            Ok(value) => stopped.map(|_| value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("ready", &self.is_ready())
            .field("children", &self.inner.children.lock().len())
            .field("tasks", &self.task_count())
            .field("handlers", &self.inner.handlers.len())
            .field("stop_signalled", &self.inner.stopped.is_set())
            .finish()
    }
}

async fn termination_signal() -> &'static str {
    match shutdown::wait_for_shutdown_signal().await {
        Ok(signal) => signal.as_str(),
        Err(err) => {
            tracing::warn!(error = %err, "cannot listen for termination signals");
            futures::future::pending().await
        }
    }
}

async fn next_unhandled(events: &mut broadcast::Receiver<Event>) -> ServiceError {
    loop {
        match events.recv().await {
            Ok(ev) if ev.kind == EventKind::TaskFailed => {
                return ServiceError::Escalated {
                    service: ev.service.as_deref().unwrap_or_default().to_string(),
                    reason: ev.reason.as_deref().unwrap_or_default().to_string(),
                };
            }
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => futures::future::pending::<()>().await,
        }
    }
}
