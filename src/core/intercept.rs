//! # Fault interception.
//!
//! A service keeps an ordered table of `(FaultKind → handler)` registrations.
//! When a task spawned on the service faults, the table is consulted **at
//! that moment** (not when the task was spawned):
//!
//! ```text
//! task fault ──► first registration whose kind matches?
//!                 ├─ yes ─► handler(&Caught)
//!                 │          ├─ Ok  ─► absorbed: TaskExit::Handled(original)
//!                 │          └─ Err ─► handler fault intercepted the same way
//!                 │                     ├─ matched   ─► absorbed (original kept)
//!                 │                     └─ unmatched ─► handler fault escapes
//!                 └─ no  ─► background-fault path: TaskExit::Failed(fault)
//! ```
//!
//! ## Matching
//! A kind built with [`FaultKind::of::<E>()`](FaultKind::of) matches a fault
//! when the fault **or any error in its `source()` chain** is an `E`.
//! [`FaultKind::any`] matches every fault. The first matching registration in
//! registration order wins; re-registering a kind replaces its handler in
//! place.

use std::any::{type_name, TypeId};
use std::error::Error;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task;

use crate::error::{Fault, TaskPanic};

/// Nesting limit for handlers whose own faults are intercepted again.
pub(crate) const MAX_HANDLER_NESTING: usize = 8;

/// Category tag used to match faults against handlers.
#[derive(Clone, Copy)]
pub struct FaultKind {
    key: TypeId,
    name: &'static str,
    matches: fn(&(dyn Error + 'static)) -> bool,
}

struct AnyFault;

fn chain_contains<E: Error + 'static>(err: &(dyn Error + 'static)) -> bool {
    let mut cur = Some(err);
    while let Some(e) = cur {
        if e.is::<E>() {
            return true;
        }
        cur = e.source();
    }
    false
}

fn match_all(_: &(dyn Error + 'static)) -> bool {
    true
}

impl FaultKind {
    /// Kind matching faults that are, or wrap, an `E`.
    pub fn of<E: Error + 'static>() -> Self {
        Self {
            key: TypeId::of::<E>(),
            name: type_name::<E>(),
            matches: chain_contains::<E>,
        }
    }

    /// Kind matching every fault.
    pub fn any() -> Self {
        Self {
            key: TypeId::of::<AnyFault>(),
            name: "any",
            matches: match_all,
        }
    }

    /// Type name of the kind (`"any"` for [`FaultKind::any`]).
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True if `fault` belongs to this kind.
    pub fn matches(&self, fault: &Fault) -> bool {
        let err: &(dyn Error + 'static) = &**fault;
        (self.matches)(err)
    }
}

impl PartialEq for FaultKind {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for FaultKind {}

impl fmt::Debug for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FaultKind").field(&self.name).finish()
    }
}

/// What a handler sees about an intercepted fault.
#[derive(Debug)]
pub struct Caught<'a> {
    /// The fault being handled.
    pub fault: &'a Fault,
    /// Name of the service whose task raised the fault.
    pub service: &'a str,
    /// Kind the handler was registered for.
    pub kind: FaultKind,
    /// Task that registered the handler, if registration happened inside a task.
    pub registered_by: Option<task::Id>,
}

impl Caught<'_> {
    /// Downcasts the fault, or the first error of type `E` in its source chain.
    pub fn find<E: Error + 'static>(&self) -> Option<&E> {
        let first: &(dyn Error + 'static) = &**self.fault;
        let mut cur = Some(first);
        while let Some(e) = cur {
            if let Some(found) = e.downcast_ref::<E>() {
                return Some(found);
            }
            cur = e.source();
        }
        None
    }
}

/// Fault handler. Returning `Err` raises a new fault from inside the handler.
pub type Handler = Arc<dyn Fn(&Caught<'_>) -> Result<(), Fault> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Registration {
    pub(crate) kind: FaultKind,
    pub(crate) handler: Handler,
    pub(crate) registered_by: Option<task::Id>,
}

/// Ordered table of fault handlers of one service.
#[derive(Default)]
pub(crate) struct HandlerTable {
    entries: RwLock<Vec<Registration>>,
}

impl HandlerTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds `reg`, replacing an earlier registration of the same kind in place.
    pub(crate) fn register(&self, reg: Registration) {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|e| e.kind == reg.kind) {
            Some(existing) => *existing = reg,
            None => entries.push(reg),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn lookup(&self, fault: &Fault) -> Option<Registration> {
        self.entries
            .read()
            .iter()
            .find(|e| e.kind.matches(fault))
            .cloned()
    }

    /// Runs the matching handler for `fault`.
    ///
    /// `Ok(original)` when absorbed, `Err(escaped)` when nothing matched or a
    /// handler raised an unmatched fault.
    pub(crate) fn intercept(&self, service: &str, fault: Fault) -> Result<Fault, Fault> {
        self.intercept_nested(service, fault, 0)
    }

    fn intercept_nested(&self, service: &str, fault: Fault, depth: usize) -> Result<Fault, Fault> {
        // The table lock is released before the handler runs, so handlers may
        // register further handlers.
        let Some(reg) = self.lookup(&fault) else {
            return Err(fault);
        };
        let caught = Caught {
            fault: &fault,
            service,
            kind: reg.kind,
            registered_by: reg.registered_by,
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| (reg.handler)(&caught)))
            .unwrap_or_else(|panic| Err(Box::new(TaskPanic::from_payload(panic)) as Fault));

        match outcome {
            Ok(()) => Ok(fault),
            Err(secondary) if depth + 1 >= MAX_HANDLER_NESTING => Err(secondary),
            Err(secondary) => self
                .intercept_nested(service, secondary, depth + 1)
                .map(|_| fault),
        }
    }
}
