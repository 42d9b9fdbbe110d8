//! Dashboard flow tests: sessions, forced password rotation, data
//! sources, and panel rendering against a live collector API.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use tower::ServiceExt;

use pulsegrid_dashboard::{dashboard_router, DashboardState};
use pulsegrid_exposition::MetricsRegistry;
use pulsegrid_store::{MetricStore, SamplePoint, UserAccount};

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Percent-encode a form value.
fn form_encode(s: &str) -> String {
    let mut out = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

async fn get(
    router: &axum::Router,
    uri: &str,
    cookie: Option<&str>,
) -> (StatusCode, Option<String>, String) {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let resp = router
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let location = resp
        .headers()
        .get(header::LOCATION)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, location, String::from_utf8_lossy(&bytes).into_owned())
}

async fn post_form(
    router: &axum::Router,
    uri: &str,
    fields: &[(&str, &str)],
    cookie: Option<&str>,
) -> (StatusCode, Option<String>, Option<String>, String) {
    let body = fields
        .iter()
        .map(|(k, v)| format!("{k}={}", form_encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let resp = router
        .clone()
        .oneshot(builder.body(Body::from(body)).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let location = resp
        .headers()
        .get(header::LOCATION)
        .map(|v| v.to_str().unwrap().to_string());
    let set_cookie = resp
        .headers()
        .get(header::SET_COOKIE)
        .map(|v| v.to_str().unwrap().split(';').next().unwrap().to_string());
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (
        status,
        location,
        set_cookie,
        String::from_utf8_lossy(&bytes).into_owned(),
    )
}

#[tokio::test]
async fn unauthenticated_requests_redirect_to_login() {
    let store = MetricStore::open_in_memory().unwrap();
    store.ensure_default_admin(epoch_ms()).unwrap();
    let router = dashboard_router(DashboardState::new(store));

    for uri in ["/", "/targets", "/datasources", "/dashboards", "/d/any"] {
        let (status, location, _) = get(&router, uri, None).await;
        assert_eq!(status, StatusCode::SEE_OTHER, "uri {uri}");
        assert_eq!(location.as_deref(), Some("/login"));
    }

    // The login page itself renders.
    let (status, _, body) = get(&router, "/login", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("form"));
}

#[tokio::test]
async fn default_credentials_force_rotation_then_stop_working() {
    let store = MetricStore::open_in_memory().unwrap();
    store.ensure_default_admin(epoch_ms()).unwrap();
    let router = dashboard_router(DashboardState::new(store));

    // Log in with the seeded pair: session lands on the rotation form.
    let (status, location, cookie, _) = post_form(
        &router,
        "/login",
        &[("username", "admin"), ("password", "admin")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location.as_deref(), Some("/password"));
    let cookie = cookie.unwrap();

    // Everything else redirects to /password until rotation.
    let (status, location, _) = get(&router, "/", Some(&cookie)).await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location.as_deref(), Some("/password"));

    // Rotate.
    let (status, location, _, _) = post_form(
        &router,
        "/password",
        &[
            ("current", "admin"),
            ("new_password", "s3cret-1"),
            ("confirm", "s3cret-1"),
        ],
        Some(&cookie),
    )
    .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location.as_deref(), Some("/"));

    // The session now reaches the overview.
    let (status, _, body) = get(&router, "/", Some(&cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Overview"));

    // The default pair no longer authenticates.
    let (status, _, _, body) = post_form(
        &router,
        "/login",
        &[("username", "admin"), ("password", "admin")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("invalid username or password"));

    // The rotated credential does.
    let (status, location, _, _) = post_form(
        &router,
        "/login",
        &[("username", "admin"), ("password", "s3cret-1")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location.as_deref(), Some("/"));
}

/// Set up a rotated operator account and return its session cookie.
async fn login_operator(store: &MetricStore, router: &axum::Router) -> String {
    store
        .put_user(&UserAccount::create("op", "op-password", epoch_ms(), false))
        .unwrap();
    let (_, _, cookie, _) = post_form(
        router,
        "/login",
        &[("username", "op"), ("password", "op-password")],
        None,
    )
    .await;
    cookie.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panel_renders_series_from_live_backend() {
    // A collector API with freshly scraped-looking samples.
    let collector_store = MetricStore::open_in_memory().unwrap();
    let now = epoch_ms();
    collector_store
        .append_samples(&[
            SamplePoint::new(
                "up",
                vec![
                    ("job".to_string(), "app".to_string()),
                    ("instance".to_string(), "app:8000".to_string()),
                ],
                now - 30_000,
                1.0,
            ),
            SamplePoint::new(
                "up",
                vec![
                    ("job".to_string(), "app".to_string()),
                    ("instance".to_string(), "app:8000".to_string()),
                ],
                now - 10_000,
                1.0,
            ),
        ])
        .unwrap();

    let api_router =
        pulsegrid_api::build_router(collector_store, Arc::new(MetricsRegistry::new()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(listener, api_router).await.unwrap();
    });

    // Dashboard with its own store and a rotated account.
    let dashboard_store = MetricStore::open_in_memory().unwrap();
    let router = dashboard_router(DashboardState::new(dashboard_store.clone()));
    let cookie = login_operator(&dashboard_store, &router).await;

    // Register the live collector; the connectivity test passes.
    let (status, _, _, body) = post_form(
        &router,
        "/datasources",
        &[("name", "pulsed"), ("url", &format!("http://{backend_addr}"))],
        Some(&cookie),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("connectivity test passed"), "body: {body}");

    // Create a dashboard with one valid panel and one bound to a missing
    // data source.
    let (status, location, _, _) = post_form(
        &router,
        "/dashboards",
        &[
            ("slug", "pipeline"),
            ("title", "Pipeline"),
            ("panels", "Up | pulsed | up\nGhost | nowhere | up"),
        ],
        Some(&cookie),
    )
    .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location.as_deref(), Some("/d/pipeline"));

    // The valid panel charts a series; the broken one shows its error
    // without taking the page down.
    let (status, _, body) = get(&router, "/d/pipeline", Some(&cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<polyline"), "no chart in body");
    assert!(body.contains("not registered"));
    assert!(body.contains("Pipeline"));
}

#[tokio::test]
async fn unreachable_data_source_is_reported_at_save_time() {
    let store = MetricStore::open_in_memory().unwrap();
    let router = dashboard_router(DashboardState::new(store.clone()));
    let cookie = login_operator(&store, &router).await;

    // Nothing listens on port 1.
    let (status, _, _, body) = post_form(
        &router,
        "/datasources",
        &[("name", "dead"), ("url", "http://127.0.0.1:1")],
        Some(&cookie),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("connectivity test failed"), "body: {body}");
    assert!(body.contains("dashboard process's network"));

    // The record saved anyway; panels will show errors until corrected.
    assert!(store.get_data_source("dead").unwrap().is_some());
}

#[tokio::test]
async fn targets_page_degrades_per_source() {
    let store = MetricStore::open_in_memory().unwrap();
    let router = dashboard_router(DashboardState::new(store.clone()));
    let cookie = login_operator(&store, &router).await;

    store
        .put_data_source(&pulsegrid_store::DataSource {
            name: "dead".to_string(),
            url: "http://127.0.0.1:1".to_string(),
            kind: "query-backend".to_string(),
            created_at: 0,
            updated_at: 0,
        })
        .unwrap();

    let (status, _, body) = get(&router, "/targets", Some(&cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("could not reach"));
}
