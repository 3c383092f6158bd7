//! `reqwest`-backed transport
//!
//! Sends a descriptor verbatim: no header stripping, no retries. Every HTTP
//! status is returned as a `Response`; reqwest errors are classified into
//! timeout / connect / other so callers can map them to gateway errors.

use std::time::Duration;

use tracing::debug;

use crate::descriptor::{RequestDescriptor, Response};
use crate::error::{Result, TransportError};
use crate::{BoxFuture, Transport};

/// Production transport over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// `timeout` bounds each call end to end, including reading the body.
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, request: &RequestDescriptor) -> Result<Response> {
        let upstream = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone())
            .timeout(self.timeout)
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| classify(e, self.timeout))?;

        let status = upstream.status();
        let headers = upstream.headers().clone();
        let body = upstream.bytes().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(format!("reading body after {}ms", self.timeout.as_millis()))
            } else {
                TransportError::Body(e.to_string())
            }
        })?;

        debug!(
            method = %request.method,
            url = %request.url,
            status = status.as_u16(),
            bytes = body.len(),
            "transport call completed"
        );

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

impl Transport for HttpTransport {
    fn send<'a>(&'a self, request: &'a RequestDescriptor) -> BoxFuture<'a, Result<Response>> {
        Box::pin(self.execute(request))
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(format!("no response within {}ms", timeout.as_millis()))
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else if error.is_builder() {
        TransportError::InvalidRequest(error.to_string())
    } else {
        TransportError::Request(error.to_string())
    }
}
