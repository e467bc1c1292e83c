//! # Lifecycle hooks implemented by concrete services.
//!
//! The engine drives the hooks; implementations only describe their own work.
//! Every hook is optional.
//!
//! ```text
//! start:  pre_start ─► children (list order) ─► do_start ─► [ready wait] ─► post_start
//! stop:   pre_stop  ─► children (reverse)    ─► do_stop  ─► join/kill tasks ─► post_stop
//! reload: children (list order) ─► do_reload
//! ```
//!
//! Hooks receive the [`Service`] they belong to, which is how they spawn
//! tasks, open the readiness gate, or look at their children.

use async_trait::async_trait;

use crate::core::service::Service;
use crate::error::Fault;

/// Outcome of [`Lifecycle::do_start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Readiness {
    /// The service is ready now; the engine opens the readiness gate.
    #[default]
    Ready,
    /// The service becomes ready later: something it spawned calls
    /// [`Service::set_ready`]. A blocking start waits up to `ready_timeout`.
    Pending,
}

/// # Hook interface of a service.
///
/// All methods default to no-ops; `do_start` defaults to
/// [`Readiness::Ready`]. Faults returned by a hook propagate to the caller of
/// `start`/`stop` wrapped in [`ServiceError::Hook`](crate::ServiceError::Hook).
///
/// # Example
/// ```
/// use std::time::Duration;
/// use async_trait::async_trait;
/// use servisor::{Fault, Lifecycle, Readiness, Service};
///
/// struct Warmup;
///
/// #[async_trait]
/// impl Lifecycle for Warmup {
///     async fn do_start(&self, svc: &Service) -> Result<Readiness, Fault> {
///         let me = svc.clone();
///         svc.spawn(move |_ctx| async move {
///             tokio::time::sleep(Duration::from_millis(10)).await;
///             me.set_ready();
///             Ok(())
///         });
///         Ok(Readiness::Pending)
///     }
/// }
/// ```
#[async_trait]
pub trait Lifecycle: Send + Sync + 'static {
    /// Runs before the children are started.
    async fn pre_start(&self, _svc: &Service) -> Result<(), Fault> {
        Ok(())
    }

    /// Starts this service's own work, after its children.
    async fn do_start(&self, _svc: &Service) -> Result<Readiness, Fault> {
        Ok(Readiness::Ready)
    }

    /// Runs once the service is marked started.
    async fn post_start(&self, _svc: &Service) -> Result<(), Fault> {
        Ok(())
    }

    /// Runs first during stop, before the children are stopped.
    async fn pre_stop(&self, _svc: &Service) -> Result<(), Fault> {
        Ok(())
    }

    /// Stops this service's own work, after its children.
    async fn do_stop(&self, _svc: &Service) -> Result<(), Fault> {
        Ok(())
    }

    /// Runs last, after tasks were joined/killed and the stop signal was set.
    async fn post_stop(&self, _svc: &Service) -> Result<(), Fault> {
        Ok(())
    }

    /// Reacts to `reload`, after the children were reloaded.
    async fn do_reload(&self, _svc: &Service) -> Result<(), Fault> {
        Ok(())
    }
}

/// Pure container: a service whose only job is to own children and tasks.
#[async_trait]
impl Lifecycle for () {}
