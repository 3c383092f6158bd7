//! HTTP relay logic
//!
//! Receives inbound requests, strips hop-by-hop and credential headers, and
//! sends them to the upstream URL through the request pipeline, which owns
//! authentication. Returns the upstream response verbatim (including error
//! status codes from upstream), minus any rotated tokens.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use credentials::{ROTATED_ACCESS_HEADER, ROTATED_REFRESH_HEADER};
use refresh::{PipelineConfig, RequestError, RequestPipeline};
use tracing::{error, instrument, warn};
use transport::{HeaderMap, HeaderName, RequestDescriptor};

use crate::service::{InFlightGuard, ServiceMetrics};

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Inbound headers the relay replaces rather than forwards
const OWNED_REQUEST_HEADERS: &[&str] = &["authorization", "host", "content-length"];

/// Shared state passed to the relay handler via axum State extractor
#[derive(Clone)]
pub struct RelayState {
    pub pipeline: Arc<RequestPipeline>,
    pub upstream_url: String,
    pub max_body_bytes: usize,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    pub in_flight: Arc<AtomicU64>,
}

impl RelayState {
    pub fn new(
        pipeline: Arc<RequestPipeline>,
        upstream_url: impl Into<String>,
        max_body_bytes: usize,
        metrics: &ServiceMetrics,
    ) -> Self {
        Self {
            pipeline,
            upstream_url: upstream_url.into(),
            max_body_bytes,
            requests_total: metrics.requests_total.clone(),
            errors_total: metrics.errors_total.clone(),
            in_flight: metrics.in_flight.clone(),
        }
    }
}

/// JSON error response: {"error":{"type":"...","message":"...","request_id":"req_..."}}
fn error_response(status: StatusCode, kind: &str, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": kind,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Relay an inbound request upstream with the current credential attached.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn relay_request(
    state: &RelayState,
    request: axum::http::Request<axum::body::Body>,
    request_id: String,
) -> Response {
    let _in_flight = InFlightGuard::enter(&state.in_flight);
    state.requests_total.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();

    let method = request.method().clone();
    let response = forward(state, request, &request_id).await;

    crate::metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn forward(
    state: &RelayState,
    request: axum::http::Request<axum::body::Body>,
    request_id: &str,
) -> Response {
    let (parts, body) = request.into_parts();

    // Build the upstream URL by appending the request path and query
    let upstream_url = match parts.uri.path_and_query() {
        Some(pq) => format!("{}{}", state.upstream_url.trim_end_matches('/'), pq),
        None => state.upstream_url.clone(),
    };

    let config = state.pipeline.config();
    let mut headers = HeaderMap::new();
    for (name, value) in &parts.headers {
        if !is_hop_by_hop(name.as_str())
            && !is_owned_request_header(name.as_str())
            && !is_credential_header(config, name)
        {
            headers.append(name.clone(), value.clone());
        }
    }

    let body_bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(b) => b,
        Err(e) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, "failed to read request body");
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &format!("invalid request body: {e}"),
                request_id,
            );
        }
    };

    let descriptor = RequestDescriptor::new(parts.method, upstream_url)
        .with_headers(headers)
        .with_body(body_bytes);

    match state.pipeline.send(descriptor).await {
        Ok(upstream) => {
            let mut response = Response::builder().status(upstream.status);
            for (name, value) in &upstream.headers {
                if !is_hop_by_hop(name.as_str()) && !is_rotation_header(name.as_str()) {
                    response = response.header(name, value);
                }
            }
            response
                .body(axum::body::Body::from(upstream.body))
                .unwrap_or_else(|e| {
                    error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "relay_error",
                        &format!("response build error: {e}"),
                        request_id,
                    )
                })
        }
        Err(RequestError::Unauthenticated) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            warn!("upstream rejected credentials and refresh did not recover them");
            error_response(
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "session ended, log in again",
                request_id,
            )
        }
        Err(RequestError::Transport(e)) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_upstream_error(e.label());
            error!(error = %e, error_type = e.label(), "upstream request failed");
            let status = if e.is_timeout() {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::BAD_GATEWAY
            };
            error_response(status, "relay_error", &format!("upstream error: {e}"), request_id)
        }
    }
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

fn is_owned_request_header(name: &str) -> bool {
    OWNED_REQUEST_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Identity and token headers the pipeline derives from the stored
/// credential. A client-supplied copy is dropped even when the credential has
/// no value to put in its place.
fn is_credential_header(config: &PipelineConfig, name: &HeaderName) -> bool {
    config.subject_header.as_ref() == Some(name)
        || config.refresh_token_header.as_ref() == Some(name)
        || is_rotation_header(name.as_str())
}

/// Rotated tokens are consumed by the pipeline and never returned to clients.
fn is_rotation_header(name: &str) -> bool {
    name.eq_ignore_ascii_case(ROTATED_ACCESS_HEADER)
        || name.eq_ignore_ascii_case(ROTATED_REFRESH_HEADER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_detection() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("TRANSFER-ENCODING"));
        assert!(is_hop_by_hop("keep-alive"));
        assert!(is_hop_by_hop("Proxy-Authorization"));
        assert!(!is_hop_by_hop("Content-Type"));
        assert!(!is_hop_by_hop("Authorization"));
        assert!(!is_hop_by_hop("X-Custom-Header"));
    }

    #[test]
    fn test_credential_headers_are_owned_by_relay() {
        assert!(is_owned_request_header("Authorization"));
        assert!(is_owned_request_header("host"));
        assert!(!is_owned_request_header("x-user-id"));
        assert!(is_rotation_header("X-Access-Token"));
        assert!(is_rotation_header("x-refresh-token"));
        assert!(!is_rotation_header("x-request-id"));
    }

    #[test]
    fn test_configured_identity_headers_are_stripped() {
        let mut config = PipelineConfig::for_api("https://api.test");
        assert!(is_credential_header(&config, &HeaderName::from_static("x-user-id")));
        assert!(is_credential_header(&config, &HeaderName::from_static("x-access-token")));
        assert!(!is_credential_header(&config, &HeaderName::from_static("x-custom")));

        config.subject_header = Some(HeaderName::from_static("x-account"));
        assert!(is_credential_header(&config, &HeaderName::from_static("x-account")));
        assert!(!is_credential_header(&config, &HeaderName::from_static("x-user-id")));

        config.subject_header = None;
        assert!(!is_credential_header(&config, &HeaderName::from_static("x-account")));
    }

    #[tokio::test]
    async fn test_error_response_format() {
        let resp = error_response(
            StatusCode::UNAUTHORIZED,
            "unauthenticated",
            "session ended",
            "req_abc123",
        );
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "unauthenticated");
        assert_eq!(json["error"]["request_id"], "req_abc123");
    }
}
