//! # Boolean signals: readiness gate and stop signal.
//!
//! Both are single-writer / multi-reader flags built on
//! [`tokio::sync::watch`]: reads never block, waiters wake on every change,
//! and a waiter that arrives after the flag was set returns immediately.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time;

#[derive(Debug)]
struct Flag {
    tx: watch::Sender<bool>,
}

impl Flag {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    fn set(&self) -> bool {
        self.tx.send_if_modified(|v| !std::mem::replace(v, true))
    }

    fn clear(&self) {
        self.tx.send_if_modified(|v| std::mem::replace(v, false));
    }

    fn get(&self) -> bool {
        *self.tx.borrow()
    }

    async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so `wait_for` cannot observe a closed channel.
        let _ = rx.wait_for(|v| *v).await;
    }
}

/// # Readiness gate of a service.
///
/// `wait_ready` timing out is not an error: callers must check
/// [`is_ready`](ReadyGate::is_ready) (or use the returned flag) afterwards.
///
/// ```rust
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use std::time::Duration;
/// use servisor::ReadyGate;
///
/// let gate = ReadyGate::new();
/// assert!(!gate.wait_ready(Duration::from_millis(10)).await);
/// gate.set_ready();
/// assert!(gate.wait_ready(Duration::from_millis(10)).await);
/// # }
/// ```
#[derive(Debug)]
pub struct ReadyGate {
    flag: Flag,
}

impl ReadyGate {
    /// Creates a closed gate.
    pub fn new() -> Self {
        Self { flag: Flag::new() }
    }

    /// Resets the gate to not-ready.
    pub fn clear(&self) {
        self.flag.clear();
    }

    /// Marks ready. Returns `true` if this call opened the gate.
    pub fn set_ready(&self) -> bool {
        self.flag.set()
    }

    /// Current state, without blocking.
    pub fn is_ready(&self) -> bool {
        self.flag.get()
    }

    /// Waits until ready or until `timeout` elapses; returns the state at return.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let _ = time::timeout(timeout, self.flag.wait()).await;
        self.is_ready()
    }
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Set exactly once per cycle, when `stop` has fully completed.
#[derive(Debug)]
pub(crate) struct StopSignal {
    flag: Flag,
}

impl StopSignal {
    pub(crate) fn new() -> Self {
        Self { flag: Flag::new() }
    }

    pub(crate) fn clear(&self) {
        self.flag.clear();
    }

    pub(crate) fn set(&self) {
        self.flag.set();
    }

    pub(crate) fn is_set(&self) -> bool {
        self.flag.get()
    }

    pub(crate) async fn wait(&self) {
        self.flag.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn set_ready_is_idempotent() {
        let gate = ReadyGate::new();
        assert!(gate.set_ready());
        assert!(!gate.set_ready());
        assert!(gate.is_ready());
        gate.clear();
        assert!(!gate.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_ready_times_out_without_error() {
        let gate = ReadyGate::new();
        let started = time::Instant::now();
        assert!(!gate.wait_ready(Duration::from_millis(200)).await);
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(!gate.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_wake_when_set_from_another_task() {
        let gate = Arc::new(ReadyGate::new());
        let setter = Arc::clone(&gate);
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(50)).await;
            setter.set_ready();
        });
        assert!(gate.wait_ready(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn stop_signal_wait_returns_once_set() {
        let signal = Arc::new(StopSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait().await })
        };
        signal.set();
        waiter.await.expect("waiter");
        assert!(signal.is_set());
        signal.clear();
        assert!(!signal.is_set());
    }
}
