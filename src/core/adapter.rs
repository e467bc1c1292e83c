//! # Foreign components as tree nodes.
//!
//! A [`Component`] only knows how to `start` and `stop`. [`ComponentAdapter`]
//! turns it into a [`Lifecycle`] so it can be attached as a child:
//!
//! ```text
//! do_start ─► spawn(component.start())   (task of the adapter service)
//! do_stop  ─► component.stop()           then the adapter's stop joins/kills
//!                                        the start task within stop_timeout
//! ```
//!
//! The adapter is ready as soon as the start task is spawned; a component has
//! no way to report readiness.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::lifecycle::{Lifecycle, Readiness};
use crate::core::service::Service;
use crate::error::Fault;

/// Long-running component with an external start/stop interface.
#[async_trait]
pub trait Component: Send + Sync + 'static {
    /// Runs the component. May return right away or run until stopped.
    async fn start(&self) -> Result<(), Fault>;

    /// Asks the component to stop; `start` is expected to return soon after.
    async fn stop(&self) -> Result<(), Fault>;
}

/// [`Lifecycle`] wrapper around a [`Component`].
pub struct ComponentAdapter<C> {
    component: Arc<C>,
}

impl<C: Component> ComponentAdapter<C> {
    /// Wraps `component`.
    pub fn new(component: C) -> Self {
        Self {
            component: Arc::new(component),
        }
    }

    /// Wraps `component` into a service named `name`.
    pub fn service(name: impl Into<Arc<str>>, component: C) -> Service {
        Service::new(name, Self::new(component))
    }

    /// The wrapped component.
    pub fn component(&self) -> &C {
        &self.component
    }
}

#[async_trait]
impl<C: Component> Lifecycle for ComponentAdapter<C> {
    async fn do_start(&self, svc: &Service) -> Result<Readiness, Fault> {
        let component = Arc::clone(&self.component);
        svc.spawn(move |_ctx| async move { component.start().await });
        Ok(Readiness::Ready)
    }

    async fn do_stop(&self, _svc: &Service) -> Result<(), Fault> {
        self.component.stop().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Listener {
        shutdown: Notify,
    }

    #[async_trait]
    impl Component for Listener {
        async fn start(&self) -> Result<(), Fault> {
            self.shutdown.notified().await;
            Ok(())
        }

        async fn stop(&self) -> Result<(), Fault> {
            self.shutdown.notify_one();
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn adapter_runs_start_as_a_task_and_stops_it() {
        let svc = ComponentAdapter::service("listener", Listener::default());
        svc.start().await.expect("start");
        assert!(svc.is_ready());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(svc.task_count(), 1);

        svc.stop().await.expect("stop");
        assert_eq!(svc.task_count(), 0);
        assert!(svc.downcast::<ComponentAdapter<Listener>>().is_some());
    }
}
