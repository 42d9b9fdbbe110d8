//! pulsegrid-dashboard — the visualization process.
//!
//! Server-rendered UI over axum + Askama: operators log in, register data
//! sources (query backends), define dashboards, and view panels rendered
//! as SVG charts. Every panel read goes over HTTP to its data source — the
//! dashboard never reaches into a collector's store directly.
//!
//! # Routes
//!
//! | Route | Handler |
//! |---|---|
//! | `/login`, `/logout` | Session management |
//! | `/password` | Forced/normal password rotation |
//! | `/` | Overview |
//! | `/targets` | Scrape target status per data source |
//! | `/datasources` | Data source list + registration |
//! | `/dashboards` | Dashboard list + creation |
//! | `/d/{slug}` | Dashboard panels |

pub mod actions;
pub mod auth;
pub mod backend;
pub mod pages;
pub mod views;

use std::collections::HashMap;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::RwLock;

use pulsegrid_store::MetricStore;

/// A logged-in session.
#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub created_ms: u64,
}

/// Shared state for dashboard handlers.
#[derive(Clone)]
pub struct DashboardState {
    pub store: MetricStore,
    /// In-memory session tokens; a restart logs everyone out, accounts
    /// themselves persist in the store.
    pub sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl DashboardState {
    pub fn new(store: MetricStore) -> Self {
        Self {
            store,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

/// Build the dashboard router.
pub fn dashboard_router(state: DashboardState) -> Router {
    let protected = Router::new()
        .route("/", get(pages::overview))
        .route("/password", get(auth::password_page).post(auth::password_submit))
        .route("/targets", get(pages::targets))
        .route("/datasources", get(pages::datasources).post(actions::create_data_source))
        .route("/datasources/{name}/delete", post(actions::delete_data_source))
        .route("/dashboards", get(pages::dashboards).post(actions::create_dashboard))
        .route("/dashboards/{slug}/delete", post(actions::delete_dashboard))
        .route("/d/{slug}", get(pages::dashboard_view))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .with_state(state.clone());

    let public = Router::new()
        .route("/login", get(auth::login_page).post(auth::login_submit))
        .route("/logout", get(auth::logout))
        .with_state(state);

    public.merge(protected)
}
