//! Session authentication and password rotation.
//!
//! Cookie sessions live in process memory; accounts live in the store.
//! The seeded default credential pair carries `must_change_password`, and
//! the middleware forces that rotation before anything else renders.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use askama::Template;
use axum::extract::{Request, State};
use axum::Form;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Redirect, Response};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::{DashboardState, Session};

const SESSION_COOKIE: &str = "pulse_session";

/// Username of the authenticated session, injected by the middleware.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

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

/// Mint a process-unique session token.
fn new_token(username: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    hex::encode(Sha256::digest(format!("{username}:{n}:{nanos}").as_bytes()))
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|part| {
        let (name, value) = part.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

fn session_cookie(token: &str) -> String {
    format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax")
}

fn clear_cookie() -> String {
    format!("{SESSION_COOKIE}=deleted; Path=/; HttpOnly; Max-Age=0")
}

// ── Middleware ──────────────────────────────────────────────────

/// Gate every protected route behind a session; route sessions whose
/// account still carries `must_change_password` to the rotation form.
pub async fn require_auth(
    State(state): State<DashboardState>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(token) = session_token(req.headers()) else {
        return Redirect::to("/login").into_response();
    };

    let username = {
        let sessions = state.sessions.read().await;
        match sessions.get(&token) {
            Some(session) => session.username.clone(),
            None => return Redirect::to("/login").into_response(),
        }
    };

    let must_change = match state.store.get_user(&username) {
        Ok(Some(account)) => account.must_change_password,
        // Account deleted out from under the session.
        Ok(None) => return Redirect::to("/login").into_response(),
        Err(e) => {
            warn!(error = %e, "user lookup failed during auth");
            return Redirect::to("/login").into_response();
        }
    };

    if must_change && req.uri().path() != "/password" {
        return Redirect::to("/password").into_response();
    }

    req.extensions_mut().insert(CurrentUser(username));
    next.run(req).await
}

// ── Login ───────────────────────────────────────────────────────

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    error: Option<String>,
}

pub async fn login_page() -> Html<String> {
    render(LoginTemplate { error: None })
}

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

pub async fn login_submit(
    State(state): State<DashboardState>,
    Form(form): Form<LoginForm>,
) -> Response {
    let account = match state.store.get_user(&form.username) {
        Ok(Some(account)) if account.verify(&form.password) => account,
        Ok(_) => {
            info!(username = %form.username, "rejected login");
            return render(LoginTemplate {
                error: Some("invalid username or password".to_string()),
            })
            .into_response();
        }
        Err(e) => {
            warn!(error = %e, "user lookup failed during login");
            return render(LoginTemplate {
                error: Some("login is temporarily unavailable".to_string()),
            })
            .into_response();
        }
    };

    let token = new_token(&account.username);
    {
        let mut sessions = state.sessions.write().await;
        sessions.insert(
            token.clone(),
            Session {
                username: account.username.clone(),
                created_ms: epoch_ms(),
            },
        );
    }
    info!(username = %account.username, "login");

    let destination = if account.must_change_password {
        "/password"
    } else {
        "/"
    };
    (
        [(SET_COOKIE, session_cookie(&token))],
        Redirect::to(destination),
    )
        .into_response()
}

pub async fn logout(State(state): State<DashboardState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        let mut sessions = state.sessions.write().await;
        sessions.remove(&token);
    }
    ([(SET_COOKIE, clear_cookie())], Redirect::to("/login")).into_response()
}

// ── Password rotation ───────────────────────────────────────────

#[derive(Template)]
#[template(path = "password.html")]
struct PasswordTemplate {
    forced: bool,
    error: Option<String>,
}

pub async fn password_page(
    State(state): State<DashboardState>,
    axum::Extension(user): axum::Extension<CurrentUser>,
) -> Html<String> {
    let forced = state
        .store
        .get_user(&user.0)
        .ok()
        .flatten()
        .map(|a| a.must_change_password)
        .unwrap_or(false);
    render(PasswordTemplate {
        forced,
        error: None,
    })
}

#[derive(Deserialize)]
pub struct PasswordForm {
    pub current: String,
    pub new_password: String,
    pub confirm: String,
}

pub async fn password_submit(
    State(state): State<DashboardState>,
    axum::Extension(user): axum::Extension<CurrentUser>,
    Form(form): Form<PasswordForm>,
) -> Response {
    let mut account = match state.store.get_user(&user.0) {
        Ok(Some(account)) => account,
        _ => return Redirect::to("/login").into_response(),
    };
    let forced = account.must_change_password;

    let error = if !account.verify(&form.current) {
        Some("current password is incorrect".to_string())
    } else if form.new_password.len() < 4 {
        Some("new password is too short".to_string())
    } else if form.new_password != form.confirm {
        Some("new passwords do not match".to_string())
    } else if form.new_password == form.current {
        Some("new password must differ from the current one".to_string())
    } else {
        None
    };
    if let Some(error) = error {
        return render(PasswordTemplate {
            forced,
            error: Some(error),
        })
        .into_response();
    }

    account.set_password(&form.new_password, epoch_ms());
    if let Err(e) = state.store.put_user(&account) {
        warn!(error = %e, "failed to persist rotated password");
        return render(PasswordTemplate {
            forced,
            error: Some("could not save the new password".to_string()),
        })
        .into_response();
    }
    info!(username = %account.username, "password rotated");
    Redirect::to("/").into_response()
}
