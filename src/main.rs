use anyhow::Result;
use graphstats::*;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    let grid = time_grid::TimeGrid::new(app_config.graph.interval)?;

    let pool = db::connect(&app_config.database.path, app_config.database.max_pool_size).await?;
    let store = Arc::new(store::AggregateStore::new(
        pool.clone(),
        grid,
        app_config.store_config(),
    ));
    store.init().await?;
    let registry = Arc::new(registry::PluginRegistry::new(pool));
    registry.init().await?;

    let cache = Arc::new(cache::AggregationCache::new(
        store.clone(),
        app_config.cache_config(),
    ));
    let ingest = Arc::new(ingest::SubmissionIngest::new(
        store.clone(),
        registry.clone(),
        cache.clone(),
        grid,
        Arc::new(ingest::normalize::Latin1Normalizer),
        app_config.ingest_config(),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let worker_handle = if app_config.aggregation.enable {
        let agg = &app_config.aggregation;
        Some(aggregation_worker::spawn(
            aggregation_worker::AggregationDeps {
                store: store.clone(),
                registry: registry.clone(),
                cache: cache.clone(),
                grid,
            },
            aggregation_worker::AggregationWorkerConfig {
                grace_period_secs: app_config.grace_period_secs() as i64,
                ranking_window_secs: agg.ranking_window_secs as i64,
                stats_log_interval_secs: agg.stats_log_interval_secs,
                vacuum_schedule: agg.vacuum_schedule.clone(),
                vacuum_interval_secs: agg.vacuum_interval_secs,
            },
            shutdown_rx,
        ))
    } else {
        tracing::info!("Aggregation worker disabled");
        None
    };

    let app = routes::app(ingest, registry, cache.clone(), grid, app_config.clone());
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        interval_secs = grid.interval_secs(),
        "Listening on http://{}",
        addr
    );

    let in_container = std::path::Path::new("/.dockerenv").exists()
        || std::env::var("CONTAINER").as_deref() == Ok("1");

    let served = if in_container {
        // In Docker: run server until error or SIGTERM (no signal handler; avoids immediate exit)
        axum::serve(listener, app).await
    } else {
        tokio::select! {
            result = axum::serve(listener, app) => result,
            _ = async {
                #[cfg(unix)]
                {
                    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                        Ok(s) => s,
                        Err(_) => {
                            let _ = tokio::signal::ctrl_c().await;
                            return;
                        }
                    };
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                #[cfg(not(unix))]
                {
                    let _ = tokio::signal::ctrl_c().await;
                }
            } => {
                tracing::info!("Received shutdown signal");
                Ok(())
            }
        }
    };

    aggregation_worker::stop(shutdown_tx, worker_handle, &cache).await;
    served?;
    Ok(())
}
