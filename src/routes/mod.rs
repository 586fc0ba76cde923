// HTTP routes: submission endpoint plus read-only views over the registry and cache.

mod http;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::cache::AggregationCache;
use crate::config::AppConfig;
use crate::ingest::SubmissionIngest;
use crate::registry::PluginRegistry;
use crate::time_grid::TimeGrid;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) ingest: Arc<SubmissionIngest>,
    pub(crate) registry: Arc<PluginRegistry>,
    pub(crate) cache: Arc<AggregationCache>,
    pub(crate) grid: TimeGrid,
    pub(crate) config: AppConfig,
}

pub fn app(
    ingest: Arc<SubmissionIngest>,
    registry: Arc<PluginRegistry>,
    cache: Arc<AggregationCache>,
    grid: TimeGrid,
    config: AppConfig,
) -> Router {
    let state = AppState {
        ingest,
        registry,
        cache,
        grid,
        config,
    };
    Router::new()
        .route("/version", get(http::version_handler)) // GET /version
        .route("/report/{plugin}", post(http::report_handler)) // POST /report/{plugin}
        .route("/api/time", get(http::time_handler)) // GET /api/time
        .route("/api/plugins", get(http::plugins_handler)) // GET /api/plugins?since=
        .route("/api/plugins/{plugin}", get(http::plugin_handler)) // GET /api/plugins/{plugin}
        .route(
            "/api/aggregate/{plugin}/{bucket}",
            get(http::aggregate_handler),
        ) // GET /api/aggregate/{plugin}/{bucket}
        .route("/api/cache", get(http::cache_stats_handler)) // GET /api/cache
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
