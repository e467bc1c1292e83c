//! # servisor
//!
//! **Servisor** builds long-running programs out of composable service trees.
//!
//! Each [`Service`] owns ordered children, a task group, a readiness gate and a
//! table of fault handlers. Starting a root brings the whole tree up
//! depth-first; stopping it tears the tree down in reverse order and bounds
//! every stop by a cooperative join window plus a forced kill grace.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                    ┌──────────────────────────────┐
//!                    │ root Service                 │
//!                    │  - Lifecycle hooks           │
//!                    │  - TaskGroup (spawned work)  │
//!                    │  - ReadyGate / stop signal   │
//!                    │  - fault handler table       │
//!                    └──────┬──────────────┬────────┘
//!                  children ▼ (list order) ▼
//!          ┌──────────────────┐   ┌──────────────────────────┐
//!          │ Service "db"     │   │ ComponentAdapter "http"  │
//!          │  (own children,  │   │  (foreign start/stop)    │
//!          │   tasks, hooks)  │   └──────────────────────────┘
//!          └──────────────────┘
//!                  │ every node publishes lifecycle events
//!                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                Bus (broadcast channel of the root)                │
//! └───────────┬──────────────────────┬───────────────────────┬────────┘
//!             ▼                      ▼                       ▼
//!     subscriber listener     run_forever escalation   Service::subscribe()
//!             ▼
//!       SubscriberSet ──► LogWriter / custom subscribers
//! ```
//!
//! ### Lifecycle
//! ```text
//! start:  pre_start ─► children (list order) ─► do_start ─► [ready wait] ─► Running ─► post_start
//!           └─ any fault ─► stop() ─► re-raise
//! stop:   Stopping ─► pre_stop ─► children (reverse) ─► do_stop
//!           └─ always: cancel ─► join(stop_timeout) ─► kill(kill_grace) ─► Stopped ─► post_stop
//! task:   fault/panic ─► first matching handler? ─► absorbed (FaultHandled)
//!                                              └─► unhandled (TaskFailed, tracing::error)
//! ```
//!
//! ## Features
//! | Area              | Description                                                      | Key types / traits                          |
//! |-------------------|------------------------------------------------------------------|---------------------------------------------|
//! | **Services**      | Ordered composition, start/stop/reload, run-forever, scopes.     | [`Service`], [`ServiceBuilder`], [`Lifecycle`] |
//! | **Tasks**         | Spawned work owned by a service, bounded two-phase teardown.     | [`TaskGroup`], [`TaskHandle`], [`TaskExit`] |
//! | **Readiness**     | Best-effort readiness gate with timeout.                         | [`ReadyGate`], [`Readiness`]                |
//! | **Faults**        | Kind-matched handlers, propagated to current descendants.       | [`FaultKind`], [`Caught`], [`TaskPanic`]    |
//! | **Components**    | Foreign start/stop objects as tree nodes.                        | [`Component`], [`ComponentAdapter`]         |
//! | **Registry**      | Process-wide name lookup with late binding.                      | [`Registry`], [`NamedRef`]                  |
//! | **Subscriber API**| Observe lifecycle events of a whole tree.                        | [`Subscribe`], [`Event`], [`EventKind`]     |
//! | **Errors**        | Typed lifecycle errors.                                          | [`ServiceError`], [`Fault`]                 |
//!
//! ## Optional features
//! - `logging` (default): exports [`LogWriter`], a subscriber rendering events through `tracing`.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use async_trait::async_trait;
//! use servisor::{Fault, Lifecycle, Readiness, Service};
//!
//! struct Ticker;
//!
//! #[async_trait]
//! impl Lifecycle for Ticker {
//!     async fn do_start(&self, svc: &Service) -> Result<Readiness, Fault> {
//!         svc.spawn(|ctx| async move {
//!             let mut tick = tokio::time::interval(Duration::from_millis(10));
//!             loop {
//!                 tokio::select! {
//!                     _ = ctx.cancelled() => return Ok(()),
//!                     _ = tick.tick() => {}
//!                 }
//!             }
//!         });
//!         Ok(Readiness::Ready)
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let root = Service::container("app");
//!     root.add_service(Service::new("ticker", Ticker))?;
//!
//!     root.start().await?;
//!     assert!(root.children().iter().all(|c| c.is_started()));
//!     root.stop().await?;
//!     Ok(())
//! }
//! ```
mod core;
mod error;
mod events;
mod subscribers;

// ---- Public re-exports ----

pub use core::{
    lookup, register, Caught, Component, ComponentAdapter, FaultKind, Handler, Lifecycle,
    NamedRef, ReadyGate, Readiness, Registry, Service, ServiceBuilder, ServiceConfig, State, Stop,
    TaskExit, TaskGroup, TaskHandle,
};
pub use error::{Fault, ServiceError, TaskPanic};
pub use events::{Bus, Event, EventKind};
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: expose a simple built-in logger subscriber.
// Enable with: `--features logging` (on by default)
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
