//! # LogWriter: render lifecycle events through `tracing`
//!
//! A minimal subscriber that turns every [`Event`] into a structured
//! `tracing` record under the `servisor` target. Install any `tracing`
//! subscriber (e.g. `tracing_subscriber::fmt`) to see them.
//!
//! | Event                                   | Level |
//! |-----------------------------------------|-------|
//! | start/ready/stop/reload transitions     | info  |
//! | ready timeout, grace exceeded, kills    | warn  |
//! | start failure, unhandled task fault     | error |
//! | handled faults, subscriber diagnostics  | debug |

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default, Debug, Clone, Copy)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let service = e.service.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::ServiceStarting => {
                tracing::info!(target: "servisor", service, seq = e.seq, "starting")
            }
            EventKind::ServiceReady => {
                tracing::info!(target: "servisor", service, seq = e.seq, "ready")
            }
            EventKind::ServiceStarted => {
                tracing::info!(target: "servisor", service, seq = e.seq, "started")
            }
            EventKind::ServiceStopping => {
                tracing::info!(target: "servisor", service, seq = e.seq, "stopping")
            }
            EventKind::ServiceStopped => {
                tracing::info!(target: "servisor", service, seq = e.seq, reason, "stopped")
            }
            EventKind::ServiceReloaded => {
                tracing::info!(target: "servisor", service, seq = e.seq, "reloaded")
            }
            EventKind::ShutdownRequested => {
                tracing::info!(target: "servisor", service, signal = reason, "shutdown requested")
            }
            EventKind::ReadyTimeout => tracing::warn!(
                target: "servisor",
                service,
                timeout_ms = e.timeout_ms,
                "not ready within timeout"
            ),
            EventKind::GraceExceeded => tracing::warn!(
                target: "servisor",
                service,
                timeout_ms = e.timeout_ms,
                tasks = e.tasks,
                "tasks still running after stop timeout"
            ),
            EventKind::TasksKilled => tracing::warn!(
                target: "servisor",
                service,
                tasks = e.tasks,
                reason,
                "tasks killed"
            ),
            EventKind::StartFailed => {
                tracing::error!(target: "servisor", service, reason, "start failed")
            }
            EventKind::TaskFailed => {
                tracing::error!(target: "servisor", service, reason, "unhandled task fault")
            }
            EventKind::FaultHandled => {
                tracing::debug!(target: "servisor", service, reason, "task fault handled")
            }
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => tracing::debug!(
                target: "servisor",
                subscriber = service,
                reason,
                kind = ?e.kind,
                "subscriber diagnostic"
            ),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handles_every_kind_without_a_subscriber_installed() {
        let w = LogWriter::new();
        for kind in [
            EventKind::ServiceStarting,
            EventKind::ServiceReady,
            EventKind::ReadyTimeout,
            EventKind::ServiceStarted,
            EventKind::StartFailed,
            EventKind::ServiceStopping,
            EventKind::ServiceStopped,
            EventKind::ServiceReloaded,
            EventKind::GraceExceeded,
            EventKind::TasksKilled,
            EventKind::ShutdownRequested,
            EventKind::FaultHandled,
            EventKind::TaskFailed,
            EventKind::SubscriberPanicked,
            EventKind::SubscriberOverflow,
        ] {
            w.on_event(&Event::new(kind).with_service("svc")).await;
        }
        assert_eq!(w.name(), "LogWriter");
    }
}
