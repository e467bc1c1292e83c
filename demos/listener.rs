//! # Example: Long-running Listener
//!
//! Wraps a foreign component (a fake TCP listener with plain start/stop
//! methods) into a tree, handles one fault kind, and runs until Ctrl-C.
//!
//! Run with: `cargo run --example listener`, then press Ctrl-C.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use servisor::{Component, Fault, LogWriter, Service, Subscribe};
use tokio::sync::Notify;

#[derive(Debug, thiserror::Error)]
#[error("client {0} hung up")]
struct HungUp(u64);

#[derive(Default)]
struct Listener {
    shutdown: Notify,
    accepted: AtomicU64,
}

#[async_trait]
impl Component for Listener {
    async fn start(&self) -> Result<(), Fault> {
        println!("[listener] accepting");
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => return Ok(()),
                _ = tokio::time::sleep(Duration::from_millis(500)) => {
                    let n = self.accepted.fetch_add(1, Ordering::Relaxed) + 1;
                    println!("[listener] accepted client {n}");
                }
            }
        }
    }

    async fn stop(&self) -> Result<(), Fault> {
        println!("[listener] shutting down");
        self.shutdown.notify_one();
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let root = Service::builder("server").with_subscribers(subs).build(());
    root.add_component("listener", Listener::default())?;

    let sessions = Service::container("sessions");
    root.add_service(sessions.clone())?;
    root.catch::<HungUp, _>(|caught| {
        println!("[server] {} in {}", caught.fault, caught.service);
        Ok(())
    });

    let ready = Box::new(|| println!("[server] up; press Ctrl-C to stop"));
    let spawner = sessions.clone();
    tokio::spawn(async move {
        for id in 1..=3u64 {
            tokio::time::sleep(Duration::from_millis(700)).await;
            spawner.spawn(move |_ctx| async move { Err(Box::new(HungUp(id)) as Fault) });
        }
    });

    match root.run_forever(None, Some(ready)).await {
        Ok(()) => println!("[server] stopped"),
        Err(err) => println!("[server] {}", err.as_message()),
    }
    Ok(())
}
