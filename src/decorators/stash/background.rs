//! Periodic background tasks: cap enforcement, retirement, and refill of
//! stale entries through a bounded worker pool. All three are optional -
//! an absent interval simply means that task is never spawned.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::Result;
use crate::executor::{ResultFormat, Rows};
use crate::pg::types::PgValue;

use super::cache::{CacheState, RefillJob};
use super::StashConfig;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Re-runs a stale query against the underlying executor. Captured once at
/// launch time over a clone of the outermost connection-owning executor, so
/// refills never run inside whatever transaction happened to trigger them.
pub type RefillFn = Arc<dyn Fn(String, Vec<PgValue>, ResultFormat) -> BoxFuture<Result<Rows>> + Send + Sync>;

/// Spawns the cap, retirement, and refill worker tasks, returning a token
/// that stops all of them when cancelled.
pub fn launch(cache: Arc<CacheState>, config: StashConfig, refill: RefillFn) -> CancellationToken {
    let shutdown = CancellationToken::new();

    let (tx, rx) = mpsc::channel::<RefillJob>(config.queue_bound);
    let rx = Arc::new(tokio::sync::Mutex::new(rx));

    for _ in 0..config.workers.max(1) {
        let rx = Arc::clone(&rx);
        let cache = Arc::clone(&cache);
        let refill = Arc::clone(&refill);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let job = tokio::select! {
                    _ = shutdown.cancelled() => None,
                    job = async { rx.lock().await.recv().await } => job,
                };
                match job {
                    Some(job) => run_refill_job(&cache, &refill, job).await,
                    None => return,
                }
            }
        });
    }

    if let Some(interval) = config.cap_interval {
        let cache = Arc::clone(&cache);
        let cap = config.cap;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => cache.enforce_cap(cap),
                }
            }
        });
    }

    if let Some(interval) = config.retire_interval {
        let cache = Arc::clone(&cache);
        let retire_after = config.retire;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => cache.retire(retire_after),
                }
            }
        });
    }

    if let Some(interval) = config.refill_interval {
        let cache = Arc::clone(&cache);
        let refill_delay = config.refill_delay;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        for job in cache.stale_candidates(refill_delay) {
                            if tx.send(job).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });
    }

    shutdown
}

async fn run_refill_job(cache: &CacheState, refill: &RefillFn, job: RefillJob) {
    match refill(job.query.clone(), job.params.clone(), job.format).await {
        Ok(rows) => cache.write_back(&job.query, &job.key, rows),
        Err(err) => {
            // Leaves the entry stale; the next scheduled pass (or a fresh
            // reader miss) will try again. Must not kill this worker task.
            warn!(sql = %job.query, error = %err, "stash refill failed");
        }
    }
}
