//! Lifecycle events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Service` lifecycle operations, task-group fault path,
//!   `run_forever`, `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the subscriber listener of a service built with
//!   subscribers, `run_forever` escalation, and [`Service::subscribe`](crate::Service::subscribe).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
