#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use servisor::{Event, EventKind, Fault, Lifecycle, Readiness, Service, ServiceConfig};
use tokio::sync::broadcast;

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// Entries of `journal` recorded for `hook`, as service names.
pub fn hooks_of(journal: &Journal, hook: &str) -> Vec<String> {
    journal
        .lock()
        .iter()
        .filter_map(|e| e.strip_suffix(&format!(":{hook}")).map(str::to_string))
        .collect()
}

#[derive(Debug, thiserror::Error)]
#[error("boom")]
pub struct Boom;

#[derive(Debug, thiserror::Error)]
#[error("crash")]
pub struct Crash;

/// Hooks that write `"<service>:<hook>"` into a shared journal.
#[derive(Default)]
pub struct Recorder {
    pub journal: Journal,
    pub pending: bool,
    pub fail_on: Option<&'static str>,
}

impl Recorder {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: Arc::clone(journal),
            ..Self::default()
        }
    }

    pub fn failing(journal: &Journal, hook: &'static str) -> Self {
        Self {
            fail_on: Some(hook),
            ..Self::new(journal)
        }
    }

    fn record(&self, svc: &Service, hook: &'static str) -> Result<(), Fault> {
        self.journal.lock().push(format!("{}:{hook}", svc.name()));
        if self.fail_on == Some(hook) {
            return Err(format!("{} refused {hook}", svc.name()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for Recorder {
    async fn pre_start(&self, svc: &Service) -> Result<(), Fault> {
        self.record(svc, "pre_start")
    }

    async fn do_start(&self, svc: &Service) -> Result<Readiness, Fault> {
        if svc.children().iter().all(|c| c.is_started()) {
            self.journal.lock().push(format!("{}:children_up", svc.name()));
        }
        self.record(svc, "do_start")?;
        Ok(if self.pending {
            Readiness::Pending
        } else {
            Readiness::Ready
        })
    }

    async fn post_start(&self, svc: &Service) -> Result<(), Fault> {
        self.record(svc, "post_start")
    }

    async fn pre_stop(&self, svc: &Service) -> Result<(), Fault> {
        self.record(svc, "pre_stop")
    }

    async fn do_stop(&self, svc: &Service) -> Result<(), Fault> {
        self.record(svc, "do_stop")
    }

    async fn post_stop(&self, svc: &Service) -> Result<(), Fault> {
        self.record(svc, "post_stop")
    }

    async fn do_reload(&self, svc: &Service) -> Result<(), Fault> {
        self.record(svc, "do_reload")
    }
}

/// Config without OS signal handling, so tests never touch process signals.
pub fn quiet() -> ServiceConfig {
    ServiceConfig {
        handle_signals: false,
        ..ServiceConfig::default()
    }
}

/// Drains every event currently buffered in `rx`.
pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

pub fn kinds(events: &[Event]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind).collect()
}
