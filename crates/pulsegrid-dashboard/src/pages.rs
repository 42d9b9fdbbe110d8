//! Dashboard page handlers.
//!
//! Each handler queries the store (or the registered backends, over HTTP),
//! builds view types, and renders an Askama template. Every backend read
//! degrades per-section: a dead data source shows an error where its data
//! would be, never a dead page.

use std::time::{SystemTime, UNIX_EPOCH};

use askama::Template;
use axum::extract::{Path, State};
use axum::response::Html;
use axum::Extension;
use tracing::debug;

use crate::auth::CurrentUser;
use crate::backend;
use crate::views::*;
use crate::DashboardState;

/// Window rendered by dashboard panels: the trailing hour at 60 s steps.
const PANEL_RANGE_MS: u64 = 60 * 60 * 1000;
const PANEL_STEP_MS: u64 = 60 * 1000;

fn render<T: Template>(tmpl: T) -> Html<String> {
    Html(
        tmpl.render()
            .unwrap_or_else(|e| format!("<pre>Template error: {e}</pre>")),
    )
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Overview ────────────────────────────────────────────────────

#[derive(Template)]
#[template(path = "overview.html")]
struct OverviewTemplate {
    active_page: &'static str,
    username: String,
    datasource_count: usize,
    dashboard_count: usize,
    dashboards: Vec<DashboardCard>,
}

pub async fn overview(
    State(state): State<DashboardState>,
    Extension(user): Extension<CurrentUser>,
) -> Html<String> {
    let sources = state.store.list_data_sources().unwrap_or_default();
    let mut dashboards = state.store.list_dashboards().unwrap_or_default();
    dashboards.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    let cards: Vec<DashboardCard> = dashboards.iter().map(DashboardCard::from_dashboard).collect();

    render(OverviewTemplate {
        active_page: "overview",
        username: user.0,
        datasource_count: sources.len(),
        dashboard_count: cards.len(),
        dashboards: cards,
    })
}

// ── Targets ─────────────────────────────────────────────────────

#[derive(Template)]
#[template(path = "targets.html")]
struct TargetsTemplate {
    active_page: &'static str,
    username: String,
    sources: Vec<SourceTargets>,
}

pub async fn targets(
    State(state): State<DashboardState>,
    Extension(user): Extension<CurrentUser>,
) -> Html<String> {
    let registered = state.store.list_data_sources().unwrap_or_default();

    let mut sources = Vec::with_capacity(registered.len());
    for source in &registered {
        let entry = match backend::fetch_targets(&source.url).await {
            Ok(statuses) => SourceTargets {
                source: source.name.clone(),
                url: source.url.clone(),
                error: None,
                rows: statuses.iter().map(TargetRow::from_status).collect(),
            },
            Err(e) => {
                debug!(source = %source.name, error = %e, "targets fetch failed");
                SourceTargets {
                    source: source.name.clone(),
                    url: source.url.clone(),
                    error: Some(e),
                    rows: Vec::new(),
                }
            }
        };
        sources.push(entry);
    }

    render(TargetsTemplate {
        active_page: "targets",
        username: user.0,
        sources,
    })
}

// ── Data sources ────────────────────────────────────────────────

#[derive(Template)]
#[template(path = "datasources.html")]
pub(crate) struct DatasourcesTemplate {
    pub active_page: &'static str,
    pub username: String,
    pub sources: Vec<DataSourceView>,
    pub error: Option<String>,
    pub notice: Option<String>,
}

pub(crate) fn datasources_template(
    state: &DashboardState,
    username: String,
    error: Option<String>,
    notice: Option<String>,
) -> DatasourcesTemplate {
    let sources = state
        .store
        .list_data_sources()
        .unwrap_or_default()
        .iter()
        .map(DataSourceView::from_source)
        .collect();
    DatasourcesTemplate {
        active_page: "datasources",
        username,
        sources,
        error,
        notice,
    }
}

pub async fn datasources(
    State(state): State<DashboardState>,
    Extension(user): Extension<CurrentUser>,
) -> Html<String> {
    render(datasources_template(&state, user.0, None, None))
}

// ── Dashboards ──────────────────────────────────────────────────

#[derive(Template)]
#[template(path = "dashboards.html")]
pub(crate) struct DashboardsTemplate {
    pub active_page: &'static str,
    pub username: String,
    pub cards: Vec<DashboardCard>,
    pub error: Option<String>,
}

pub(crate) fn dashboards_template(
    state: &DashboardState,
    username: String,
    error: Option<String>,
) -> DashboardsTemplate {
    let mut dashboards = state.store.list_dashboards().unwrap_or_default();
    dashboards.sort_by(|a, b| a.slug.cmp(&b.slug));
    DashboardsTemplate {
        active_page: "dashboards",
        username,
        cards: dashboards.iter().map(DashboardCard::from_dashboard).collect(),
        error,
    }
}

pub async fn dashboards(
    State(state): State<DashboardState>,
    Extension(user): Extension<CurrentUser>,
) -> Html<String> {
    render(dashboards_template(&state, user.0, None))
}

// ── Dashboard view ──────────────────────────────────────────────

#[derive(Template)]
#[template(path = "dashboard_view.html")]
struct DashboardViewTemplate {
    active_page: &'static str,
    username: String,
    title: String,
    slug: String,
    range_display: String,
    panels: Vec<PanelView>,
    missing: bool,
}

pub async fn dashboard_view(
    State(state): State<DashboardState>,
    Extension(user): Extension<CurrentUser>,
    Path(slug): Path<String>,
) -> Html<String> {
    let Some(dashboard) = state.store.get_dashboard(&slug).ok().flatten() else {
        return render(DashboardViewTemplate {
            active_page: "dashboards",
            username: user.0,
            title: "Not found".to_string(),
            slug,
            range_display: String::new(),
            panels: Vec::new(),
            missing: true,
        });
    };

    let end_ms = epoch_ms();
    let start_ms = end_ms.saturating_sub(PANEL_RANGE_MS);

    let mut panels = Vec::with_capacity(dashboard.panels.len());
    for panel in &dashboard.panels {
        panels.push(render_panel(&state, panel, start_ms, end_ms).await);
    }

    render(DashboardViewTemplate {
        active_page: "dashboards",
        username: user.0,
        title: dashboard.title,
        slug: dashboard.slug,
        range_display: "last 1h".to_string(),
        panels,
        missing: false,
    })
}

/// Resolve one panel: look up its data source, pull the range over HTTP,
/// chart it. Every failure mode lands in the panel's own error slot.
async fn render_panel(
    state: &DashboardState,
    panel: &pulsegrid_store::Panel,
    start_ms: u64,
    end_ms: u64,
) -> PanelView {
    let source = match state.store.get_data_source(&panel.datasource) {
        Ok(Some(source)) => source,
        Ok(None) => {
            return PanelView {
                title: panel.title.clone(),
                datasource: panel.datasource.clone(),
                query: panel.query.clone(),
                chart: None,
                error: Some(format!(
                    "data source {:?} is not registered",
                    panel.datasource
                )),
            };
        }
        Err(e) => {
            return PanelView {
                title: panel.title.clone(),
                datasource: panel.datasource.clone(),
                query: panel.query.clone(),
                chart: None,
                error: Some(e.to_string()),
            };
        }
    };

    match backend::fetch_range(&source.url, &panel.query, start_ms, end_ms, PANEL_STEP_MS).await
    {
        Ok(series) => PanelView {
            title: panel.title.clone(),
            datasource: panel.datasource.clone(),
            query: panel.query.clone(),
            chart: Some(build_chart(&series, start_ms, end_ms)),
            error: None,
        },
        Err(e) => {
            debug!(panel = %panel.title, error = %e, "panel query failed");
            PanelView {
                title: panel.title.clone(),
                datasource: panel.datasource.clone(),
                query: panel.query.clone(),
                chart: None,
                error: Some(e),
            }
        }
    }
}
