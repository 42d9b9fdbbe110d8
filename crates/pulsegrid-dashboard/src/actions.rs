//! Form actions: data source and dashboard management.

use std::time::{SystemTime, UNIX_EPOCH};

use askama::Template;
use axum::extract::{Path, State};
use axum::Form;
use axum::response::{Html, IntoResponse, Redirect, Response};
use serde::Deserialize;
use tracing::info;

use pulsegrid_store::{Dashboard, DataSource, Panel};

use crate::auth::CurrentUser;
use crate::backend;
use crate::pages::{dashboards_template, datasources_template};
use crate::DashboardState;

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

fn valid_slug(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

// ── Data sources ────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct DataSourceForm {
    pub name: String,
    pub url: String,
}

/// POST /datasources
///
/// Runs the connectivity test from this process before saving. A failed
/// test still saves the record — panels bound to it show errors until the
/// URL is corrected — but the failure is surfaced right here, at save
/// time, where the operator can read it.
pub async fn create_data_source(
    State(state): State<DashboardState>,
    axum::Extension(user): axum::Extension<CurrentUser>,
    Form(form): Form<DataSourceForm>,
) -> Response {
    let name = form.name.trim().to_string();
    let url = form.url.trim().trim_end_matches('/').to_string();

    if !valid_slug(&name) {
        return render(datasources_template(
            &state,
            user.0,
            Some("name must be lowercase letters, digits, '-' or '_'".to_string()),
            None,
        ))
        .into_response();
    }
    if let Err(e) = backend::parse_base_url(&url) {
        return render(datasources_template(&state, user.0, Some(e), None)).into_response();
    }
    match state.store.get_data_source(&name) {
        Ok(Some(_)) => {
            return render(datasources_template(
                &state,
                user.0,
                Some(format!("data source {name:?} already exists")),
                None,
            ))
            .into_response();
        }
        Ok(None) => {}
        Err(e) => {
            return render(datasources_template(&state, user.0, Some(e.to_string()), None))
                .into_response();
        }
    }

    let test_result = backend::connectivity_test(&url).await;

    let now = epoch_ms();
    let source = DataSource {
        name: name.clone(),
        url,
        kind: "query-backend".to_string(),
        created_at: now,
        updated_at: now,
    };
    if let Err(e) = state.store.put_data_source(&source) {
        return render(datasources_template(&state, user.0, Some(e.to_string()), None))
            .into_response();
    }
    info!(name = %source.name, url = %source.url, "data source registered");

    let (error, notice) = match test_result {
        Ok(()) => (None, Some(format!("data source {name:?} saved; connectivity test passed"))),
        Err(e) => (Some(format!("saved, but the connectivity test failed: {e}")), None),
    };
    render(datasources_template(&state, user.0, error, notice)).into_response()
}

/// POST /datasources/{name}/delete
pub async fn delete_data_source(
    State(state): State<DashboardState>,
    Path(name): Path<String>,
) -> Redirect {
    match state.store.delete_data_source(&name) {
        Ok(true) => info!(%name, "data source deleted"),
        Ok(false) => {}
        Err(e) => tracing::warn!(%name, error = %e, "data source delete failed"),
    }
    Redirect::to("/datasources")
}

// ── Dashboards ──────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct DashboardForm {
    pub slug: String,
    pub title: String,
    /// One panel per line: `Title | datasource | query`.
    pub panels: String,
}

/// POST /dashboards
pub async fn create_dashboard(
    State(state): State<DashboardState>,
    axum::Extension(user): axum::Extension<CurrentUser>,
    Form(form): Form<DashboardForm>,
) -> Response {
    let slug = form.slug.trim().to_string();
    let title = form.title.trim().to_string();

    if !valid_slug(&slug) {
        return render(dashboards_template(
            &state,
            user.0,
            Some("slug must be lowercase letters, digits, '-' or '_'".to_string()),
        ))
        .into_response();
    }
    if title.is_empty() {
        return render(dashboards_template(&state, user.0, Some("title is required".to_string())))
            .into_response();
    }

    let panels = match parse_panels(&form.panels) {
        Ok(panels) if panels.is_empty() => {
            return render(dashboards_template(
                &state,
                user.0,
                Some("a dashboard needs at least one panel".to_string()),
            ))
            .into_response();
        }
        Ok(panels) => panels,
        Err(e) => {
            return render(dashboards_template(&state, user.0, Some(e))).into_response();
        }
    };

    let now = epoch_ms();
    let created_at = state
        .store
        .get_dashboard(&slug)
        .ok()
        .flatten()
        .map(|d| d.created_at)
        .unwrap_or(now);
    let dashboard = Dashboard {
        slug: slug.clone(),
        title,
        panels,
        created_at,
        updated_at: now,
    };
    if let Err(e) = state.store.put_dashboard(&dashboard) {
        return render(dashboards_template(&state, user.0, Some(e.to_string()))).into_response();
    }
    info!(%slug, panels = dashboard.panels.len(), "dashboard saved");
    Redirect::to(&format!("/d/{slug}")).into_response()
}

/// POST /dashboards/{slug}/delete
pub async fn delete_dashboard(
    State(state): State<DashboardState>,
    Path(slug): Path<String>,
) -> Redirect {
    match state.store.delete_dashboard(&slug) {
        Ok(true) => info!(%slug, "dashboard deleted"),
        Ok(false) => {}
        Err(e) => tracing::warn!(%slug, error = %e, "dashboard delete failed"),
    }
    Redirect::to("/dashboards")
}

/// Parse the panel textarea: one `Title | datasource | query` per line.
/// Panel order follows line order. Data source names are not resolved
/// here — referential validity is a render-time concern.
fn parse_panels(input: &str) -> Result<Vec<Panel>, String> {
    let mut panels = Vec::new();
    for (i, raw) in input.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split('|').map(str::trim).collect();
        let [title, datasource, query] = parts.as_slice() else {
            return Err(format!(
                "panel line {}: expected 'Title | datasource | query'",
                i + 1
            ));
        };
        if title.is_empty() || datasource.is_empty() || query.is_empty() {
            return Err(format!("panel line {}: empty field", i + 1));
        }
        panels.push(Panel {
            title: title.to_string(),
            datasource: datasource.to_string(),
            query: query.to_string(),
        });
    }
    Ok(panels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_panels_preserves_order() {
        let panels = parse_panels(
            "Up | pulsed | up\nMemory | pulsed | process_resident_memory_bytes\n",
        )
        .unwrap();
        assert_eq!(panels.len(), 2);
        assert_eq!(panels[0].title, "Up");
        assert_eq!(panels[1].query, "process_resident_memory_bytes");
    }

    #[test]
    fn parse_panels_skips_blank_lines() {
        let panels = parse_panels("\nUp | pulsed | up\n\n").unwrap();
        assert_eq!(panels.len(), 1);
    }

    #[test]
    fn parse_panels_rejects_malformed_lines() {
        let err = parse_panels("Up | pulsed").unwrap_err();
        assert!(err.contains("line 1"));

        let err = parse_panels("Up | pulsed | up\n | x | y").unwrap_err();
        assert!(err.contains("line 2"));
    }

    #[test]
    fn parse_panels_allows_pipes_nowhere_but_separators() {
        let err = parse_panels("A | b | c | d").unwrap_err();
        assert!(err.contains("expected"));
    }

    #[test]
    fn slug_validation() {
        assert!(valid_slug("pipeline-overview"));
        assert!(valid_slug("node_2"));
        assert!(!valid_slug(""));
        assert!(!valid_slug("Has Space"));
        assert!(!valid_slug("UPPER"));
    }
}
