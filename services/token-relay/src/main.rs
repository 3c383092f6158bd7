//! Token Relay
//!
//! Single-binary Rust service that:
//! 1. Holds one session's credential (memory or file-backed)
//! 2. Listens for incoming requests
//! 3. Attaches the bearer credential and relays them to the upstream API
//! 4. Refreshes the credential once when concurrent requests hit a 401, then
//!    replays each of them
//! 5. Exposes an admin API to log in and out

mod admin;
mod config;
mod metrics;
mod relay;
mod service;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use credentials::{
    Credential, CredentialStore, FileCredentialStore, MemoryCredentialStore, SessionTerminator,
};
use metrics_exporter_prometheus::PrometheusHandle;
use refresh::RequestPipeline;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::{HttpTransport, Transport};

use crate::admin::AdminState;
use crate::config::Config;
use crate::relay::RelayState;
use crate::service::{DRAIN_TIMEOUT, ServiceMetrics, SessionMonitor};

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    relay: RelayState,
    session: SessionMonitor,
    metrics: ServiceMetrics,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(relay_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting token-relay");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder()?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let pipeline_config = config.pipeline_config()?;

    info!(
        listen_addr = %config.relay.listen_addr,
        upstream_url = %config.relay.upstream_url,
        refresh_url = %pipeline_config.refresh_url,
        admin_enabled = config.relay.admin_addr.is_some(),
        "configuration loaded"
    );

    let store: Arc<dyn CredentialStore> = match &config.session.credential_file {
        Some(path) => Arc::new(
            FileCredentialStore::load(path.clone())
                .await
                .with_context(|| format!("failed to load credential file {}", path.display()))?,
        ),
        None => Arc::new(MemoryCredentialStore::new()),
    };

    let monitor = SessionMonitor::new(store.get().await.is_some());
    let terminator = Arc::new(SessionTerminator::new(
        store.clone(),
        Arc::new(monitor.clone()),
    ));

    // A bootstrap refresh token only seeds an empty store; a persisted
    // credential is newer than whatever the deployment was started with.
    if !monitor.is_active()
        && let Some(token) = &config.session.refresh_token
    {
        terminator
            .begin(Credential::new("").with_refresh_token(token.expose().clone()))
            .await
            .context("failed to store bootstrap refresh token")?;
        info!("bootstrap refresh token loaded, first request will refresh it");
    }

    if !monitor.is_active() {
        warn!("no credential available, requests will be rejected until login via admin API");
    }

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(
        reqwest::Client::new(),
        Duration::from_secs(config.relay.timeout_secs),
    ));
    let pipeline = Arc::new(RequestPipeline::new(
        transport,
        terminator.clone(),
        pipeline_config,
    ));

    let service_metrics = ServiceMetrics::new();
    let app_state = AppState {
        relay: RelayState::new(
            pipeline.clone(),
            config.relay.upstream_url.clone(),
            config.relay.max_body_bytes,
            &service_metrics,
        ),
        session: monitor.clone(),
        metrics: service_metrics.clone(),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.relay.max_connections);

    let listen_addr = config.relay.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;

    if let Some(admin_addr) = config.relay.admin_addr {
        let admin_listener = TcpListener::bind(admin_addr)
            .await
            .with_context(|| format!("failed to bind admin listener to {admin_addr}"))?;
        let admin_app = admin::build_admin_router(AdminState::new(
            terminator.clone(),
            monitor.clone(),
            pipeline.coordinator().clone(),
        ));
        tokio::spawn(async move {
            if let Err(e) = axum::serve(admin_listener, admin_app).await {
                error!(error = %e, "admin server failed");
            }
        });
        info!(addr = %admin_addr, "admin API listening");
    }

    info!(addr = %listen_addr, "accepting requests");

    // Clone in_flight counter for drain observability after shutdown
    let in_flight = service_metrics.in_flight.clone();

    // The drain timeout starts when the shutdown signal fires: notify the
    // server to drain, then race the drain against DRAIN_TIMEOUT.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            let remaining = in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: returns JSON with status, session state, uptime, counters.
/// Returns 200 while a session is active, 503 once it has ended.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.metrics.started_at.elapsed().as_secs();
    let requests = state.metrics.requests_total.load(Ordering::Relaxed);
    let errors = state.metrics.errors_total.load(Ordering::Relaxed);
    let coordinator = state.relay.pipeline.coordinator();

    let (status_code, status, session) = if state.session.is_active() {
        (axum::http::StatusCode::OK, "healthy", "active")
    } else {
        (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "degraded",
            "ended",
        )
    };

    let body = serde_json::json!({
        "status": status,
        "session": session,
        "refreshing": coordinator.is_refreshing(),
        "refreshes_completed": coordinator.epoch(),
        "sessions_ended": state.session.ended_total(),
        "uptime_seconds": uptime,
        "requests_served": requests,
        "errors_total": errors,
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint: text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Catch-all handler that relays all non-health requests upstream.
async fn relay_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    relay::relay_request(&state.relay, request, request_id).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
///
/// If a handler cannot be installed, that signal source is treated as never
/// firing and a warning is logged.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
