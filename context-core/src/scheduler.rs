//! Periodic retention sweeps and snapshot persistence.
//!
//! Both loops talk to the engine only through its public methods. Shutdown
//! is signalled between ticks, so an in-progress sweep or snapshot always
//! runs to completion.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::ContextEngine;
use crate::error::Result;
use crate::persistence::PersistReport;

/// Handles to the running background loops.
#[derive(Debug)]
pub struct BackgroundTasks {
    engine: ContextEngine,
    shutdown: watch::Sender<bool>,
    gc: JoinHandle<()>,
    persist: JoinHandle<()>,
}

impl BackgroundTasks {
    /// Spawn the GC and persistence loops on the current tokio runtime.
    ///
    /// The first run of each loop happens one full interval after start.
    pub fn start(engine: ContextEngine) -> Self {
        let (shutdown, _) = watch::channel(false);

        let gc_engine = engine.clone();
        let gc = tokio::spawn(run_periodic(
            "gc",
            engine.config().gc_interval(),
            shutdown.subscribe(),
            move || {
                let engine = gc_engine.clone();
                async move {
                    if let Err(e) = engine.sweep() {
                        warn!("Scheduled sweep failed: {}", e);
                    }
                }
            },
        ));

        let persist_engine = engine.clone();
        let persist = tokio::spawn(run_periodic(
            "persist",
            engine.config().persist_interval(),
            shutdown.subscribe(),
            move || {
                let engine = persist_engine.clone();
                async move {
                    match engine.persist_all().await {
                        Ok(report) if !report.all_succeeded() => {
                            warn!(failed = report.failed.len(), "Scheduled snapshot partially failed");
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Scheduled snapshot failed: {}", e),
                    }
                }
            },
        ));

        info!(
            gc_interval_secs = engine.config().gc_interval_secs,
            persist_interval_secs = engine.config().persist_interval_secs,
            "Background tasks started"
        );

        Self {
            engine,
            shutdown,
            gc,
            persist,
        }
    }

    /// Stop both loops, wait for them, then write one final snapshot.
    pub async fn shutdown(self) -> Result<PersistReport> {
        let _ = self.shutdown.send(true);

        for (name, handle) in [("gc", self.gc), ("persist", self.persist)] {
            if let Err(e) = handle.await {
                warn!(task = name, "Background task ended abnormally: {}", e);
            }
        }

        let report = self.engine.persist_all().await?;
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Background tasks stopped"
        );
        Ok(report)
    }
}

async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // skip first immediate tick

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(task = name, "Shutdown signal received");
                    break;
                }
            }
            _ = ticker.tick() => {
                debug!(task = name, "Tick");
                tick().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::memory::{EntryMetadata, EventKind, Payload};
    use crate::persistence::{MemoryBackend, PersistenceManager};
    use serde_json::json;
    use std::sync::Arc;

    fn engine_with(backend: Arc<MemoryBackend>, gc_secs: u64, persist_secs: u64) -> ContextEngine {
        let config = EngineConfig {
            gc_interval_secs: gc_secs,
            persist_interval_secs: persist_secs,
            ..EngineConfig::default()
        };
        ContextEngine::new(config)
            .unwrap()
            .with_persistence(PersistenceManager::new(vec![backend]))
    }

    #[tokio::test(start_paused = true)]
    async fn test_gc_runs_on_interval() {
        let backend = Arc::new(MemoryBackend::new("unused"));
        let engine = engine_with(backend, 60, 3_600);
        let id = engine
            .capture(EventKind::Generic, Payload::new(json!({"msg": "scratch"})), EntryMetadata::new())
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        engine.begin_session().unwrap();

        let tasks = BackgroundTasks::start(engine.clone());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(engine.get(&id).unwrap().is_some());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(engine.get(&id).unwrap().is_none());

        tasks.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_runs_on_interval() {
        let backend = Arc::new(MemoryBackend::new("timer"));
        let engine = engine_with(backend.clone(), 3_600, 300);

        let tasks = BackgroundTasks::start(engine);
        assert!(!backend.has_data().await);

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(backend.has_data().await);

        tasks.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_writes_final_snapshot() {
        let backend = Arc::new(MemoryBackend::new("final"));
        let engine = engine_with(backend.clone(), 3_600, 3_600);
        let tasks = BackgroundTasks::start(engine.clone());

        engine
            .capture(EventKind::Milestone, Payload::empty(), EntryMetadata::new())
            .unwrap();
        let report = tasks.shutdown().await.unwrap();

        assert!(report.all_succeeded());
        let restored = engine_with(backend, 3_600, 3_600);
        restored.restore().await.unwrap();
        assert_eq!(restored.stats().unwrap().total_entries, 1);
    }
}
