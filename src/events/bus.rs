//! # Event bus shared by a service tree.
//!
//! [`Bus`] wraps [`tokio::sync::broadcast`]. Every service owns a bus handle;
//! attaching a child makes the child (and its descendants) publish on the
//! parent's bus, so a subscriber on the root observes the whole tree.
//!
//! ```text
//! Publishers (many):                  Receivers:
//!   root service ──┐
//!   child A     ───┼──────► Bus ───┬──► subscriber listener ──► SubscriberSet
//!   child B     ───┤ (broadcast)   ├──► run_forever (escalation)
//!   task groups ───┘               └──► Service::subscribe() (tests, tooling)
//! ```
//!
//! ## Rules
//! - `publish()` never blocks and never fails; with no receivers the event is dropped.
//! - Capacity is one ring buffer shared by all receivers; receivers that fall
//!   behind observe `RecvError::Lagged(n)` and skip the `n` oldest events.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for lifecycle events.
///
/// Cheap to clone (holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus; capacity is clamped to a minimum of 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all current receivers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver observing events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// True if both handles publish into the same channel.
    pub fn same_channel(&self, other: &Bus) -> bool {
        self.tx.same_channel(&other.tx)
    }
}
