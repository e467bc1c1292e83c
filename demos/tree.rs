//! # Example: Service Tree
//!
//! Builds a small tree, starts it, lets it run for a moment and stops it.
//!
//! ```text
//! app ─┬─ db     (ready once its warm-up task finishes)
//!      └─ cache  (ready immediately, flushes on stop)
//! ```
//!
//! Run with: `RUST_LOG=servisor=debug cargo run --example tree`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use servisor::{Fault, Lifecycle, LogWriter, Readiness, Service, Subscribe};
use tracing_subscriber::EnvFilter;

struct Db;

#[async_trait]
impl Lifecycle for Db {
    async fn do_start(&self, svc: &Service) -> Result<Readiness, Fault> {
        let me = svc.clone();
        svc.spawn(move |_ctx| async move {
            println!("[db] warming up");
            tokio::time::sleep(Duration::from_millis(150)).await;
            me.set_ready();
            println!("[db] ready");
            Ok(())
        });
        Ok(Readiness::Pending)
    }

    async fn do_stop(&self, _svc: &Service) -> Result<(), Fault> {
        println!("[db] closing connections");
        Ok(())
    }
}

struct Cache;

#[async_trait]
impl Lifecycle for Cache {
    async fn do_start(&self, svc: &Service) -> Result<Readiness, Fault> {
        svc.spawn(|ctx| async move {
            let mut tick = tokio::time::interval(Duration::from_millis(100));
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => return Ok(()),
                    _ = tick.tick() => println!("[cache] sweep"),
                }
            }
        });
        Ok(Readiness::Ready)
    }

    async fn post_stop(&self, _svc: &Service) -> Result<(), Fault> {
        println!("[cache] flushed");
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("servisor=info")),
        )
        .init();

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let app = Service::builder("app")
        .handle_signals(false)
        .with_subscribers(subs)
        .build(());
    app.add_service(Service::new("db", Db))?;
    app.add_service(Service::new("cache", Cache))?;

    app.scope(|app| async move {
        println!("[app] started, children: {:?}", app.children());
        tokio::time::sleep(Duration::from_millis(350)).await;
    })
    .await?;

    println!("[app] stopped: {:?}", app.state());
    Ok(())
}
