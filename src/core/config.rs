//! # Per-service configuration.
//!
//! [`ServiceConfig`] bounds how long a service waits during its lifecycle and
//! wires optional `run_forever` behavior. Every service owns its own copy;
//! children do not inherit their parent's configuration.
//!
//! ## Sentinel values
//! - `stop_timeout = 0s` → skip the cooperative join, kill immediately
//! - `ready_timeout = 0s` → a blocking start does not wait for readiness

use std::time::Duration;

/// Configuration of a single service.
///
/// ## Field semantics
/// - `stop_timeout`: cooperative join window of `stop`
/// - `ready_timeout`: readiness wait of a blocking `start` and of `require_ready`
/// - `kill_grace`: wait for aborted tasks to unwind after the join window
/// - `handle_signals`: `run_forever` stops the tree on SIGINT/SIGTERM/SIGQUIT
/// - `escalate_unhandled`: `run_forever` stops the tree on an unhandled task fault
/// - `bus_capacity`: event ring buffer size (min 1)
///
/// ## Example
/// ```
/// use std::time::Duration;
/// use servisor::ServiceConfig;
///
/// let mut cfg = ServiceConfig::default();
/// cfg.stop_timeout = Duration::from_millis(500);
/// assert_eq!(cfg.ready_timeout, Duration::from_secs(2));
/// ```
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// How long `stop` waits for tasks to finish on their own.
    ///
    /// Tasks still alive afterwards are aborted.
    pub stop_timeout: Duration,

    /// How long a blocking `start` waits for a service that reported
    /// [`Readiness::Pending`](crate::Readiness::Pending).
    ///
    /// Reaching it is not a fault: start continues and the service runs
    /// without being ready.
    pub ready_timeout: Duration,

    /// How long `stop` waits for aborted tasks to terminate.
    ///
    /// Together with `stop_timeout` this bounds every `stop` call.
    pub kill_grace: Duration,

    /// Whether `run_forever` listens for OS termination signals.
    pub handle_signals: bool,

    /// Whether `run_forever` treats an unhandled task fault anywhere in the
    /// tree as fatal and shuts the tree down.
    pub escalate_unhandled: bool,

    /// Capacity of the service's event bus.
    ///
    /// Only the bus of a root matters: attached children publish on their
    /// parent's bus.
    pub bus_capacity: usize,
}

impl ServiceConfig {
    /// Upper bound of a `stop` call on this service alone (hooks excluded).
    #[inline]
    pub fn teardown_bound(&self) -> Duration {
        self.stop_timeout + self.kill_grace
    }
}

impl Default for ServiceConfig {
    /// Default configuration:
    ///
    /// - `stop_timeout = 1s`
    /// - `ready_timeout = 2s`
    /// - `kill_grace = 1s`
    /// - `handle_signals = true`
    /// - `escalate_unhandled = false`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(1),
            ready_timeout: Duration::from_secs(2),
            kill_grace: Duration::from_secs(1),
            handle_signals: true,
            escalate_unhandled: false,
            bus_capacity: 1024,
        }
    }
}
