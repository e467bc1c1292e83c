//! # Event subscribers.
//!
//! ```text
//! Service ── publish(Event) ──► Bus ──► listener ──► SubscriberSet::emit
//!                                                     ├──► LogWriter (tracing)
//!                                                     └──► custom subscribers
//! ```
//!
//! Subscribers are attached with
//! [`ServiceBuilder::with_subscribers`](crate::ServiceBuilder::with_subscribers);
//! the listener starts on the first `start` of that service.

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscriber;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
