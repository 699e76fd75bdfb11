//! Memory metabolism: the background sweep that makes frequently used
//! thoughts durable and lets unused ones decay.
//!
//! Each tick:
//! 1. Drain the cache's promotion candidates and write each one to every backend.
//!    Candidates that reached no backend are re-queued if still resident.
//! 2. Forget entries not accessed within `forget_after`.
//!
//! Exactly one sweep task exists per scheduler. Start and stop are serialized
//! by an async mutex; stop cancels the wait, lets an in-flight sweep finish,
//! then returns. Backend panics are absorbed by the fan-out; each sweep also
//! runs in its own task so any other panic only fails that tick.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cache::CacheLayer;
use super::cognitive::Cognition;
use crate::backend::fanout::BackendFanout;
use crate::error::{Error, Result};

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Candidates written to at least one backend.
    pub promoted: usize,
    /// Candidates no backend accepted.
    pub failed: usize,
    /// Failed candidates put back for the next tick.
    pub requeued: usize,
    pub forgotten: usize,
}

/// Cumulative metabolism counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetabolismStats {
    pub ticks: u64,
    /// Ticks whose sweep panicked.
    pub failed_ticks: u64,
    /// Candidates promoted to durable storage.
    pub processed: u64,
    pub forgotten: u64,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    failed_ticks: AtomicU64,
    processed: AtomicU64,
    forgotten: AtomicU64,
}

/// The state one sweep needs; shared with the background task.
struct Sweeper {
    cache: Arc<CacheLayer>,
    fanout: Arc<BackendFanout>,
    cognition: Arc<Cognition>,
    forget_after: chrono::Duration,
    counters: Counters,
}

impl Sweeper {
    async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        // 1. Promote
        for entry in self.cache.drain_promotion_candidates() {
            let mut metadata = entry.metadata.clone();
            metadata.insert("promoted_at".into(), json!(Utc::now().to_rfc3339()));
            metadata.insert("content_type".into(), json!(entry.content_type));
            metadata.insert("access_count".into(), json!(entry.access_count));
            metadata.insert("ci_sources".into(), json!(entry.ci_sources));

            let stored = self
                .fanout
                .store_everywhere(&entry.key, &entry.content, &metadata)
                .await;
            if stored.is_durable() {
                report.promoted += 1;
                debug!(key = %entry.key, backends = stored.succeeded(), "promoted to durable storage");
            } else {
                report.failed += 1;
                if self.cache.mark_for_promotion(&entry.key) {
                    report.requeued += 1;
                }
                warn!(key = %entry.key, "promotion reached no backend");
            }
        }

        // 2. Forget
        report.forgotten = self.cognition.forget_naturally(self.forget_after);

        self.counters
            .processed
            .fetch_add(report.promoted as u64, Ordering::Relaxed);
        self.counters
            .forgotten
            .fetch_add(report.forgotten as u64, Ordering::Relaxed);
        report
    }
}

struct Worker {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

pub struct MetabolismScheduler {
    sweeper: Arc<Sweeper>,
    interval: Duration,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<Worker>>,
}

impl MetabolismScheduler {
    pub fn new(
        cache: Arc<CacheLayer>,
        fanout: Arc<BackendFanout>,
        cognition: Arc<Cognition>,
        interval: Duration,
        forget_after: chrono::Duration,
    ) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::Config(
                "metabolism interval must be greater than zero".into(),
            ));
        }
        Ok(Self {
            sweeper: Arc::new(Sweeper {
                cache,
                fanout,
                cognition,
                forget_after,
                counters: Counters::default(),
            }),
            interval,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the background task. Returns `false` if it was already running.
    pub async fn start(&self) -> bool {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return false;
        }

        let token = CancellationToken::new();
        self.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.sweeper),
            self.interval,
            token.clone(),
            Arc::clone(&self.running),
        ));
        *worker = Some(Worker { handle, token });

        info!(interval_ms = self.interval.as_millis() as u64, "memory metabolism started");
        true
    }

    /// Stop the background task and wait for it to exit. Returns `false` if
    /// it wasn't running.
    pub async fn stop(&self) -> bool {
        let mut worker = self.worker.lock().await;
        let Some(Worker { handle, token }) = worker.take() else {
            return false;
        };

        token.cancel();
        if let Err(e) = handle.await {
            error!(error = %e, "metabolism task ended abnormally");
        }
        self.running.store(false, Ordering::SeqCst);
        info!("memory metabolism stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one sweep inline, independent of the background task.
    pub async fn run_once(&self) -> SweepReport {
        self.sweeper.sweep().await
    }

    pub fn stats(&self) -> MetabolismStats {
        let counters = &self.sweeper.counters;
        MetabolismStats {
            ticks: counters.ticks.load(Ordering::Relaxed),
            failed_ticks: counters.failed_ticks.load(Ordering::Relaxed),
            processed: counters.processed.load(Ordering::Relaxed),
            forgotten: counters.forgotten.load(Ordering::Relaxed),
        }
    }
}

impl Drop for MetabolismScheduler {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.token.cancel();
        }
    }
}

async fn run_loop(
    sweeper: Arc<Sweeper>,
    interval: Duration,
    token: CancellationToken,
    running: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; sweeps start one interval in.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                sweeper.counters.ticks.fetch_add(1, Ordering::Relaxed);
                let tick = Arc::clone(&sweeper);
                match tokio::spawn(async move { tick.sweep().await }).await {
                    Ok(report) => debug!(
                        promoted = report.promoted,
                        failed = report.failed,
                        forgotten = report.forgotten,
                        "metabolism sweep complete"
                    ),
                    Err(e) => {
                        sweeper.counters.failed_ticks.fetch_add(1, Ordering::Relaxed);
                        error!(error = %e, "metabolism sweep failed");
                    }
                }
            }
        }
    }

    running.store(false, Ordering::SeqCst);
}
