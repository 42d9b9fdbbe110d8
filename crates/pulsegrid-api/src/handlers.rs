//! Collector API handlers.
//!
//! Query handlers answer with the shared `QueryResponse` envelope; status
//! mapping is parse → 400, evaluation → 422, store → 500. Handler failures
//! never crash the process.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use pulsegrid_query::{QueryData, QueryError, QueryResponse, DEFAULT_LOOKBACK_MS};

use crate::ApiState;

fn failure(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<QueryResponse>) {
    (status, Json(QueryResponse::failure(message)))
}

fn error_status(e: &QueryError) -> StatusCode {
    match e {
        QueryError::Parse(_) => StatusCode::BAD_REQUEST,
        QueryError::InvalidRange(_) => StatusCode::UNPROCESSABLE_ENTITY,
        QueryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ── Queries ────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct InstantParams {
    pub query: Option<String>,
    /// Evaluation time in unix milliseconds; defaults to now.
    pub time: Option<u64>,
}

/// GET /api/v1/query
pub async fn query(
    State(state): State<ApiState>,
    Query(params): Query<InstantParams>,
) -> impl IntoResponse {
    let Some(expr) = params.query else {
        return failure(StatusCode::BAD_REQUEST, "missing 'query' parameter");
    };
    let at_ms = params.time.unwrap_or_else(epoch_ms);

    match state.engine.instant(&expr, at_ms, DEFAULT_LOOKBACK_MS) {
        Ok(result) => (
            StatusCode::OK,
            Json(QueryResponse::success(QueryData {
                result_type: "vector".to_string(),
                result,
            })),
        ),
        Err(e) => failure(error_status(&e), e.to_string()),
    }
}

#[derive(Deserialize)]
pub struct RangeParams {
    pub query: Option<String>,
    /// Range bounds in unix milliseconds.
    pub start: Option<u64>,
    pub end: Option<u64>,
    /// Optional step in milliseconds.
    pub step: Option<u64>,
}

/// GET /api/v1/query_range
pub async fn query_range(
    State(state): State<ApiState>,
    Query(params): Query<RangeParams>,
) -> impl IntoResponse {
    let Some(expr) = params.query else {
        return failure(StatusCode::BAD_REQUEST, "missing 'query' parameter");
    };
    let (Some(start), Some(end)) = (params.start, params.end) else {
        return failure(
            StatusCode::BAD_REQUEST,
            "missing 'start' or 'end' parameter",
        );
    };

    match state.engine.range(&expr, start, end, params.step) {
        Ok(result) => (
            StatusCode::OK,
            Json(QueryResponse::success(QueryData {
                result_type: "matrix".to_string(),
                result,
            })),
        ),
        Err(e) => failure(error_status(&e), e.to_string()),
    }
}

// ── Targets ────────────────────────────────────────────────────

/// GET /api/v1/targets
pub async fn targets(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_target_statuses() {
        Ok(statuses) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "success",
                "data": { "targets": statuses },
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "status": "error",
                "error": e.to_string(),
            })),
        ),
    }
}

// ── Status ─────────────────────────────────────────────────────

/// GET /api/v1/status
pub async fn status() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "success",
        "data": {
            "service": "pulsed",
            "version": env!("CARGO_PKG_VERSION"),
            "ready": true,
        },
    }))
}

// ── Exposition ─────────────────────────────────────────────────

/// GET /metrics — the collector's own metrics. Side-effect free.
pub async fn metrics(State(state): State<ApiState>) -> impl IntoResponse {
    state.registry.refresh_process_metrics();
    let body = state.registry.render();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
