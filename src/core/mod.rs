//! Runtime core: the service tree and its lifecycle.
//!
//! Internal modules:
//! - [`service`]: the supervised node, its state machine and composition;
//! - [`lifecycle`]: hook trait implemented by concrete services;
//! - [`adapter`]: foreign start/stop components as tree nodes;
//! - [`group`]: task group with two-phase (join, then kill) teardown;
//! - [`gate`]: readiness gate and stop signal;
//! - [`intercept`]: fault-kind matching and handler tables;
//! - [`registry`]: process-wide name lookup;
//! - [`config`]: per-service timeouts and switches;
//! - [`shutdown`]: cross-platform termination signals.

mod adapter;
mod config;
mod gate;
mod group;
mod intercept;
mod lifecycle;
mod registry;
mod service;
mod shutdown;

pub use adapter::{Component, ComponentAdapter};
pub use config::ServiceConfig;
pub use gate::ReadyGate;
pub use group::{TaskExit, TaskGroup, TaskHandle};
pub use intercept::{Caught, FaultKind, Handler};
pub use lifecycle::{Lifecycle, Readiness};
pub use registry::{lookup, register, NamedRef, Registry};
pub use service::{Service, ServiceBuilder, State, Stop};
