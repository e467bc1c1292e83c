//! # Lifecycle events emitted by services and their task groups.
//!
//! The [`EventKind`] enum classifies events across four categories:
//! - **Lifecycle events**: start/ready/stop/reload transitions of a service
//! - **Teardown events**: cooperative join overrun and forced kills
//! - **Fault events**: task faults absorbed by a handler or left unhandled
//! - **Subscriber events**: overflow/panic inside subscriber workers
//!
//! The [`Event`] struct carries metadata such as the service name, a reason,
//! a timeout, and a task count.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. Use `seq` to restore the exact order when events reach
//! different subscribers at different times.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use servisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::GraceExceeded)
//!     .with_service("api")
//!     .with_timeout(Duration::from_millis(250))
//!     .with_tasks(3);
//!
//! assert_eq!(ev.kind, EventKind::GraceExceeded);
//! assert_eq!(ev.service.as_deref(), Some("api"));
//! assert_eq!(ev.timeout_ms, Some(250));
//! assert_eq!(ev.tasks, Some(3));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Lifecycle ===
    /// `start` accepted; `pre_start` is about to run.
    ///
    /// Sets: `service`
    ServiceStarting,

    /// The readiness gate was opened.
    ///
    /// Sets: `service`
    ServiceReady,

    /// Blocking start gave up waiting for readiness (not a fault).
    ///
    /// Sets: `service`, `timeout_ms`
    ReadyTimeout,

    /// The full start sequence completed; the service is running.
    ///
    /// Sets: `service`
    ServiceStarted,

    /// The start sequence failed; a teardown follows.
    ///
    /// Sets: `service`, `reason`
    StartFailed,

    /// `stop` began; the service no longer reports as started.
    ///
    /// Sets: `service`
    ServiceStopping,

    /// The stop sequence completed and the stop signal was set.
    ///
    /// Sets: `service`, `reason` (first stop fault, if any)
    ServiceStopped,

    /// `reload` ran on this service.
    ///
    /// Sets: `service`
    ServiceReloaded,

    // === Teardown ===
    /// Cooperative join timed out; surviving tasks will be killed.
    ///
    /// Sets: `service`, `timeout_ms`, `tasks` (survivors)
    GraceExceeded,

    /// Surviving tasks were aborted.
    ///
    /// Sets: `service`, `tasks` (aborted), `reason` when some did not
    /// terminate within the kill grace
    TasksKilled,

    /// `run_forever` observed an OS termination signal.
    ///
    /// Sets: `service`, `reason` (signal name)
    ShutdownRequested,

    // === Faults ===
    /// A task fault matched a registered handler and was absorbed.
    ///
    /// Sets: `service`, `reason` (rendered fault)
    FaultHandled,

    /// A task fault matched no handler (background-fault path).
    ///
    /// Sets: `service`, `reason` (rendered fault)
    TaskFailed,

    // === Subscribers ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `service` (subscriber name), `reason` (panic info)
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `service` (subscriber name), `reason`
    SubscriberOverflow,
}

/// Lifecycle event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Name of the service the event is about.
    pub service: Option<Arc<str>>,
    /// Human-readable reason (faults, signal names, overflow details).
    pub reason: Option<Arc<str>>,
    /// Timeout involved, in milliseconds.
    pub timeout_ms: Option<u32>,
    /// Number of tasks involved.
    pub tasks: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            service: None,
            reason: None,
            timeout_ms: None,
            tasks: None,
        }
    }

    /// Attaches a service name.
    #[inline]
    pub fn with_service(mut self, service: impl Into<Arc<str>>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a timeout (stored as milliseconds, saturating).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.timeout_ms = Some(ms);
        self
    }

    /// Attaches a task count (saturating).
    #[inline]
    pub fn with_tasks(mut self, n: usize) -> Self {
        self.tasks = Some(u32::try_from(n).unwrap_or(u32::MAX));
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_service(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_service(subscriber)
            .with_reason(info)
    }

    /// True for events produced by the subscriber machinery itself.
    ///
    /// These are never reported again when they overflow, which would loop.
    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}
