//! pulsegrid-api — the collector's HTTP surface.
//!
//! Provides axum route handlers for the query API, target status, and the
//! collector's own metrics exposition.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/query` | Instant query (`query`, optional `time` in ms) |
//! | GET | `/api/v1/query_range` | Range query (`query`, `start`, `end`, optional `step` in ms) |
//! | GET | `/api/v1/targets` | Per-target scrape status |
//! | GET | `/api/v1/status` | Readiness document (data-source connectivity tests hit this) |
//! | GET | `/metrics` | Own metrics, text exposition |

pub mod handlers;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use pulsegrid_exposition::MetricsRegistry;
use pulsegrid_query::QueryEngine;
use pulsegrid_store::MetricStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: MetricStore,
    pub engine: QueryEngine,
    pub registry: Arc<MetricsRegistry>,
}

/// Build the collector API router.
pub fn build_router(store: MetricStore, registry: Arc<MetricsRegistry>) -> Router {
    let state = ApiState {
        engine: QueryEngine::new(store.clone()),
        store,
        registry,
    };

    let api_routes = Router::new()
        .route("/query", get(handlers::query))
        .route("/query_range", get(handlers::query_range))
        .route("/targets", get(handlers::targets))
        .route("/status", get(handlers::status))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics).with_state(state))
}
