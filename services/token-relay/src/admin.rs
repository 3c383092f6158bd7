//! Admin API for session management
//!
//! Runs on a separate listener (`relay.admin_addr`) and is never exposed
//! alongside the relay port.
//!
//! Endpoints:
//! - GET    /admin/session: session status, never exposes tokens
//! - POST   /admin/session: store a credential and re-arm the session
//! - DELETE /admin/session: clear the credential and end the session

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use credentials::{Credential, SessionTerminator};
use refresh::RefreshCoordinator;
use serde::Deserialize;
use tracing::{info, warn};

use crate::service::SessionMonitor;

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    terminator: Arc<SessionTerminator>,
    monitor: SessionMonitor,
    coordinator: RefreshCoordinator,
}

impl AdminState {
    pub fn new(
        terminator: Arc<SessionTerminator>,
        monitor: SessionMonitor,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self {
            terminator,
            monitor,
            coordinator,
        }
    }
}

/// Build the admin axum router.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route(
            "/admin/session",
            get(session_status).post(login).delete(logout),
        )
        .with_state(state)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> impl IntoResponse {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// GET /admin/session
async fn session_status(State(state): State<AdminState>) -> impl IntoResponse {
    let credential = state.terminator.store().get().await;
    let status = match (&credential, state.monitor.is_active()) {
        (Some(_), true) => "active",
        (Some(_), false) => "stale",
        (None, _) => "ended",
    };

    json_response(
        StatusCode::OK,
        serde_json::json!({
            "status": status,
            "subject": credential.as_ref().and_then(|c| c.subject()),
            "issued_at": credential.as_ref().map(|c| c.issued_at),
            "has_access_token": credential.as_ref().is_some_and(|c| c.access().is_some()),
            "has_refresh_token": credential.as_ref().is_some_and(|c| c.refresh().is_some()),
            "refreshing": state.coordinator.is_refreshing(),
            "refresh_epoch": state.coordinator.epoch(),
            "sessions_ended": state.monitor.ended_total(),
        }),
    )
}

/// Request body for POST /admin/session.
#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    subject_id: Option<String>,
}

/// POST /admin/session
///
/// Either token may be omitted, but not both: a refresh token alone is
/// enough, the first relayed request refreshes it into an access token.
async fn login(
    State(state): State<AdminState>,
    axum::Json(body): axum::Json<LoginRequest>,
) -> impl IntoResponse {
    let refresh_token = body.refresh_token.filter(|t| !t.is_empty());
    if body.access_token.is_empty() && refresh_token.is_none() {
        return json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": "access_token or refresh_token is required" }),
        );
    }

    let mut credential = Credential::new(body.access_token);
    if let Some(token) = refresh_token {
        credential = credential.with_refresh_token(token);
    }
    if let Some(subject) = body.subject_id.filter(|s| !s.is_empty()) {
        credential = credential.with_subject(subject);
    }
    let subject = credential.subject().map(str::to_owned);

    if let Err(e) = state.terminator.begin(credential).await {
        warn!(error = %e, "failed to store credential");
        return json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": format!("failed to store credential: {e}") }),
        );
    }

    info!(subject = subject.as_deref().unwrap_or("-"), "session started via admin API");
    json_response(
        StatusCode::OK,
        serde_json::json!({ "status": "active", "subject": subject }),
    )
}

/// DELETE /admin/session
async fn logout(State(state): State<AdminState>) -> impl IntoResponse {
    state.terminator.terminate().await;
    info!("session ended via admin API");
    json_response(StatusCode::OK, serde_json::json!({ "status": "ended" }))
}
