// Background scheduler: wake at each bucket deadline (+ grace), aggregate the bucket that
// just closed for every ranked plugin through the cache, prune raw samples, sweep the cache.
// VACUUM runs on a configurable schedule (cron expression or fixed interval).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::AggregationCache;
use crate::registry::PluginRegistry;
use crate::store::AggregateStore;
use crate::time_grid::{Bucket, TimeGrid, unix_now};
use tracing::{info, instrument, warn};

/// Config for the aggregation worker.
#[derive(Debug, Clone)]
pub struct AggregationWorkerConfig {
    pub grace_period_secs: i64,
    pub ranking_window_secs: i64,
    pub stats_log_interval_secs: u64,
    /// Optional cron expression for VACUUM (e.g. "0 0 3 * * *" = 03:00 daily). Uses local time.
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    pub vacuum_interval_secs: u64,
}

pub struct AggregationDeps {
    pub store: Arc<AggregateStore>,
    pub registry: Arc<PluginRegistry>,
    pub cache: Arc<AggregationCache>,
    pub grid: TimeGrid,
}

/// What one pass did. Failures are counted, never returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub bucket: Bucket,
    pub aggregated: u32,
    pub failed: u32,
    pub samples_pruned: u64,
    pub cache_evicted: usize,
}

/// Spawns the aggregation worker. Returns a join handle; it exits when `shutdown_rx` fires.
pub fn spawn(
    deps: AggregationDeps,
    config: AggregationWorkerConfig,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(deps, config, shutdown_rx).await;
    })
}

/// Shutdown sequence shared by every serving mode: signal the worker, wait for it,
/// then settle and close the cache.
pub async fn stop(
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
    handle: Option<tokio::task::JoinHandle<()>>,
    cache: &AggregationCache,
) {
    let _ = shutdown_tx.send(());
    if let Some(handle) = handle
        && let Err(e) = handle.await
    {
        warn!(error = %e, "aggregation worker did not exit cleanly");
    }
    cache.shutdown().await;
}

#[instrument(skip_all, fields(interval_secs = deps.grid.interval_secs()))]
async fn run(
    deps: AggregationDeps,
    config: AggregationWorkerConfig,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) {
    let mut stats_tick =
        tokio::time::interval(Duration::from_secs(config.stats_log_interval_secs));
    stats_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let (vacuum_tx, mut vacuum_rx) = tokio::sync::mpsc::channel::<()>(1);
    let vacuum_handle = tokio::spawn(vacuum_scheduler(config.clone(), vacuum_tx));

    loop {
        let wait = until_next_pass(&deps.grid, config.grace_period_secs, unix_now());
        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                let now = unix_now();
                if let Err(e) = run_one_pass(&deps, &config, now).await {
                    warn!(error = %e, "aggregation pass failed");
                }
            }
            _ = stats_tick.tick() => {
                let stats = deps.cache.stats();
                info!(
                    cache_entries = stats.entries,
                    cache_hits = stats.hits,
                    cache_misses = stats.misses,
                    cache_coalesced = stats.coalesced,
                    computations = stats.computations,
                    computation_failures = stats.failures,
                    cache_evictions = stats.evictions,
                    "app stats"
                );
            }
            _ = vacuum_rx.recv() => {
                if let Err(e) = deps.store.vacuum().await {
                    warn!(error = %e, "vacuum failed");
                } else {
                    info!("vacuum complete");
                }
            }
            _ = &mut shutdown_rx => {
                tracing::debug!("Aggregation worker shutting down");
                break;
            }
        }
    }
    vacuum_handle.abort();
}

/// Time from `now` until the next bucket deadline plus grace. At least one second.
pub fn until_next_pass(grid: &TimeGrid, grace_period_secs: i64, now: i64) -> Duration {
    let due = grid.next_bucket_deadline(now - grace_period_secs).start() + grace_period_secs;
    Duration::from_secs((due - now).max(1) as u64)
}

/// Sends a message on `tx` at each VACUUM time (cron or fixed interval). Uses local time for cron.
async fn vacuum_scheduler(config: AggregationWorkerConfig, tx: tokio::sync::mpsc::Sender<()>) {
    if let Some(ref cron_str) = config.vacuum_schedule {
        let Ok(schedule) = cron::Schedule::from_str(cron_str) else {
            warn!(cron = %cron_str, "invalid vacuum_schedule; VACUUM will not run");
            return;
        };
        loop {
            let now = chrono::Local::now();
            let next = schedule.after(&now).next();
            if let Some(next) = next {
                let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    } else {
        let interval = Duration::from_secs(config.vacuum_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}

/// Runs one aggregation pass at `now` (read once by the caller). Per-plugin failures are
/// logged and counted; only ranking or pruning errors fail the pass.
pub async fn run_one_pass(
    deps: &AggregationDeps,
    config: &AggregationWorkerConfig,
    now: i64,
) -> anyhow::Result<PassSummary> {
    let bucket = deps.grid.previous_bucket(now - config.grace_period_secs);
    let plugins = deps
        .registry
        .list_ranked(config.ranking_window_secs, now)
        .await?;

    let mut aggregated: u32 = 0;
    let mut failed: u32 = 0;
    for plugin in &plugins {
        let outcome = match deps.cache.get_or_compute(plugin.id, bucket, now).await {
            // Joined a computation that started before the bucket closed.
            Ok(row) if row.partial => {
                deps.cache.invalidate(plugin.id, bucket);
                deps.cache.get_or_compute(plugin.id, bucket, now).await
            }
            other => other,
        };
        match outcome {
            Ok(_) => aggregated += 1,
            Err(e) => {
                failed += 1;
                warn!(
                    plugin = %plugin.name,
                    bucket = %bucket,
                    error = %e,
                    "aggregate not computed; retried on next access"
                );
            }
        }
    }

    let samples_pruned = deps.store.prune_samples(now).await?;
    let cache_evicted = deps.cache.sweep(now);

    info!(
        bucket = %bucket,
        aggregated,
        failed,
        samples_pruned,
        cache_evicted,
        "aggregation pass"
    );

    Ok(PassSummary {
        bucket,
        aggregated,
        failed,
        samples_pruned,
        cache_evicted,
    })
}
