//! # Event subscriber trait.
//!
//! [`Subscribe`] is the extension point for reacting to lifecycle events
//! (logging, metrics, alerting) without touching the services themselves.
//!
//! Each subscriber gets a dedicated worker task and a bounded queue; a slow
//! or panicking subscriber only affects itself. See
//! [`SubscriberSet`](crate::SubscriberSet) for delivery rules.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use servisor::{Event, EventKind, Subscribe};
//!
//! struct FaultCounter;
//!
//! #[async_trait]
//! impl Subscribe for FaultCounter {
//!     async fn on_event(&self, ev: &Event) {
//!         if matches!(ev.kind, EventKind::TaskFailed) {
//!             // bump a counter, page someone, ...
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "fault-counter" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Lifecycle event subscriber.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event, in FIFO order for this subscriber.
    ///
    /// Called from the subscriber's worker task, never from the publisher.
    async fn on_event(&self, event: &Event);

    /// Name used in overflow/panic reports.
    ///
    /// Defaults to `type_name::<Self>()`; override it with something short.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Queue capacity for this subscriber (clamped to at least 1).
    ///
    /// Default: 1024.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
