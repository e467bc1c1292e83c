//! Error types used by the servisor runtime and by supervised work.
//!
//! This module defines:
//!
//! - [`ServiceError`]: errors raised by lifecycle operations (`start`, `stop`,
//!   `run_forever`, composition) and reported synchronously to the caller.
//! - [`Fault`]: what hooks and spawned tasks raise. Faults raised inside
//!   spawned tasks never reach a caller directly; they are matched against the
//!   service's handlers or reported on the background-fault path.
//! - [`TaskPanic`]: a panic inside spawned work or a handler, converted into
//!   a regular, matchable fault.
//!
//! [`ServiceError`] provides `as_label` / `as_message` helpers for logs and
//! events.

use std::any::Any;
use std::time::Duration;

use thiserror::Error;

/// A fault raised by a lifecycle hook, a spawned task, or a fault handler.
pub type Fault = Box<dyn std::error::Error + Send + Sync + 'static>;

/// # Errors produced by lifecycle operations.
///
/// Hook faults are wrapped in [`ServiceError::Hook`] together with the service
/// and hook names, so a failure deep inside a tree can be traced back to the
/// node that raised it.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ServiceError {
    /// `start` was called on a service that is starting or running.
    #[error("service {service:?} already started")]
    AlreadyStarted {
        /// Name of the service.
        service: String,
    },

    /// `start` was called while a stop of the same service is in progress.
    #[error("service {service:?} is stopping")]
    Stopping {
        /// Name of the service.
        service: String,
    },

    /// An operation requiring readiness ran before the service became ready.
    #[error("service {service:?} not ready after {timeout:?}")]
    NotReady {
        /// Name of the service.
        service: String,
        /// How long the caller waited for readiness.
        timeout: Duration,
    },

    /// A lifecycle hook returned a fault.
    #[error("service {service:?}: {hook} failed: {source}")]
    Hook {
        /// Name of the service whose hook failed.
        service: String,
        /// Hook name (`pre_start`, `do_stop`, ...).
        hook: &'static str,
        /// The fault returned by the hook.
        #[source]
        source: Fault,
    },

    /// Start failed and the teardown that followed failed as well.
    ///
    /// The start failure is the `source`; the teardown failure is kept so it
    /// is never silently dropped.
    #[error("start aborted: {source}; teardown also failed: {teardown}")]
    StartAborted {
        /// The fault that aborted start.
        #[source]
        source: Box<ServiceError>,
        /// The fault raised while tearing the service down.
        teardown: Box<ServiceError>,
    },

    /// The child service already has a parent.
    #[error("service {child:?} is already attached to {parent:?}")]
    AlreadyAttached {
        /// Name of the child being attached.
        child: String,
        /// Name of its current parent.
        parent: String,
    },

    /// Attaching the child would create a cycle in the tree.
    #[error("attaching {child:?} to {parent:?} would create a cycle")]
    Cycle {
        /// Name of the child being attached.
        child: String,
        /// Name of the would-be parent.
        parent: String,
    },

    /// `run_forever` was interrupted by an OS termination signal.
    #[error("service {service:?} interrupted by {signal}")]
    Interrupted {
        /// Name of the service that was running.
        service: String,
        /// Signal that interrupted the wait.
        signal: &'static str,
    },

    /// `run_forever` observed an unhandled task fault and shut the tree down.
    #[error("service {service:?}: unhandled task fault: {reason}")]
    Escalated {
        /// Name of the service whose task failed.
        service: String,
        /// Rendered fault.
        reason: String,
    },

    /// `run_forever` was interrupted or escalated, and stopping the tree
    /// afterwards failed as well.
    #[error("shutdown after {source}; teardown also failed: {teardown}")]
    ShutdownAborted {
        /// Why the wait ended ([`Interrupted`](ServiceError::Interrupted) or
        /// [`Escalated`](ServiceError::Escalated)).
        #[source]
        source: Box<ServiceError>,
        /// The fault raised while tearing the tree down.
        teardown: Box<ServiceError>,
    },
}

impl ServiceError {
    /// Returns a short stable label (snake_case) for use in logs/events.
    ///
    /// # Example
    /// ```
    /// use servisor::ServiceError;
    ///
    /// let err = ServiceError::AlreadyStarted { service: "db".into() };
    /// assert_eq!(err.as_label(), "service_already_started");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ServiceError::AlreadyStarted { .. } => "service_already_started",
            ServiceError::Stopping { .. } => "service_stopping",
            ServiceError::NotReady { .. } => "service_not_ready",
            ServiceError::Hook { .. } => "service_hook_failed",
            ServiceError::StartAborted { .. } => "service_start_aborted",
            ServiceError::AlreadyAttached { .. } => "service_already_attached",
            ServiceError::Cycle { .. } => "service_cycle",
            ServiceError::Interrupted { .. } => "service_interrupted",
            ServiceError::Escalated { .. } => "service_escalated",
            ServiceError::ShutdownAborted { .. } => "service_shutdown_aborted",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            ServiceError::Hook {
                service,
                hook,
                source,
            } => format!("{service}.{hook}: {source}"),
            ServiceError::StartAborted { source, teardown } => {
                format!("start: {}; teardown: {}", source.as_message(), teardown.as_message())
            }
            ServiceError::ShutdownAborted { source, teardown } => {
                format!("shutdown: {}; teardown: {}", source.as_message(), teardown.as_message())
            }
            other => other.to_string(),
        }
    }

    /// True when the error is the double-start condition.
    pub fn is_already_started(&self) -> bool {
        matches!(self, ServiceError::AlreadyStarted { .. })
    }
}

/// # A panic caught inside spawned work or a fault handler.
///
/// Register a handler for `TaskPanic` to intercept panics the same way as any
/// other fault kind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("panicked: {message}")]
pub struct TaskPanic {
    message: String,
}

impl TaskPanic {
    /// Builds a fault from a panic payload (as returned by `catch_unwind`).
    pub fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }

    /// The panic message.
    pub fn message(&self) -> &str {
        &self.message
    }
}
