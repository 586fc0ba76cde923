// HTTP handlers: report submission, version, time grid, plugin ranking, aggregates.

use axum::{
    Form, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::AppState;
use crate::error::{CacheError, IngestError};
use crate::ingest::Submission;
use crate::time_grid::{Bucket, hour_floor, unix_now};
use crate::version::{NAME, VERSION};

/// GET /version returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// POST /report/{plugin}: form-encoded submission. Field order and duplicates are kept.
pub(super) async fn report_handler(
    State(state): State<AppState>,
    Path(plugin): Path<String>,
    Form(fields): Form<Vec<(String, String)>>,
) -> Response {
    let submission = Submission::new(fields);
    match state.ingest.ingest(&plugin, &submission, unix_now()).await {
        Ok(_) => (StatusCode::OK, "OK").into_response(),
        Err(IngestError::MissingField(field)) => {
            tracing::debug!(plugin = %plugin, field = %field, "submission rejected");
            (StatusCode::BAD_REQUEST, "ERR Missing arguments.").into_response()
        }
        Err(IngestError::UnknownPlugin(_)) => {
            (StatusCode::NOT_FOUND, "ERR Unknown plugin.").into_response()
        }
        Err(IngestError::Store(e)) => {
            tracing::warn!(plugin = %plugin, error = %e, operation = "ingest", "submission failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "ERR Internal error.").into_response()
        }
    }
}

/// GET /api/time: current bucket, next aggregation deadline and hour floor, from one clock read.
pub(super) async fn time_handler(State(state): State<AppState>) -> impl IntoResponse {
    let now = unix_now();
    Json(serde_json::json!({
        "now": now,
        "intervalSecs": state.grid.interval_secs(),
        "currentBucket": state.grid.current_bucket(now),
        "nextBucketDeadline": state.grid.next_bucket_deadline(now),
        "hourFloor": hour_floor(now),
    }))
}

#[derive(Debug, Deserialize)]
pub(super) struct RankQuery {
    since: Option<i64>,
}

/// GET /api/plugins?since=SECS: plugins ranked by active servers in the trailing window.
pub(super) async fn plugins_handler(
    State(state): State<AppState>,
    Query(query): Query<RankQuery>,
) -> Response {
    let since = query
        .since
        .unwrap_or(state.config.aggregation.ranking_window_secs as i64);
    match state.registry.list_ranked(since, unix_now()).await {
        Ok(plugins) => Json(plugins).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, operation = "list_ranked", "plugin ranking failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "ranking failed")
        }
    }
}

/// GET /api/plugins/{plugin}
pub(super) async fn plugin_handler(
    State(state): State<AppState>,
    Path(plugin): Path<String>,
) -> Response {
    match state.registry.load_by_name(&plugin).await {
        Ok(Some(entity)) => Json(entity).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "unknown plugin"),
        Err(e) => {
            tracing::warn!(error = %e, operation = "load_by_name", "plugin lookup failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "lookup failed")
        }
    }
}

/// GET /api/aggregate/{plugin}/{bucket}: aggregate for one bucket, via the cache.
pub(super) async fn aggregate_handler(
    State(state): State<AppState>,
    Path((plugin, bucket)): Path<(String, i64)>,
) -> Response {
    let bucket = Bucket::new(bucket);
    if !state.grid.is_aligned(bucket) {
        return error_response(StatusCode::BAD_REQUEST, "bucket is not on the graph grid");
    }
    let entity = match state.registry.load_by_name(&plugin).await {
        Ok(Some(entity)) => entity,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "unknown plugin"),
        Err(e) => {
            tracing::warn!(error = %e, operation = "load_by_name", "plugin lookup failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "lookup failed");
        }
    };

    match state.cache.get_or_compute(entity.id, bucket, unix_now()).await {
        Ok(row) => Json(row.as_ref()).into_response(),
        Err(e) => {
            let status = match e {
                CacheError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                CacheError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
                CacheError::Computation(_) | CacheError::Store(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            error_response(status, &e.to_string())
        }
    }
}

/// GET /api/cache: cache counters.
pub(super) async fn cache_stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.cache.stats())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
