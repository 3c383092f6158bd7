//! Request descriptors and responses
//!
//! A `RequestDescriptor` is an immutable-by-convention description of one
//! outbound call. The pipeline never mutates the caller's descriptor: it
//! decorates a clone with credentials for each attempt, so the original can
//! be replayed after a refresh with a different credential attached.

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Result, TransportError};

/// What an outbound call is for.
///
/// The refresh call is marked explicitly so a 401 on it can never trigger
/// another refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Ordinary API call that carries the access token
    Regular,
    /// Dedicated credential refresh call (refresh token only)
    Refresh,
}

/// Outbound call: method, URL, headers, body, plus pipeline bookkeeping.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    kind: RequestKind,
    replayed: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            kind: RequestKind::Regular,
            replayed: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Add or replace a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replace the header map wholesale.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Serialize `value` as the JSON body and set `content-type`.
    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| TransportError::InvalidRequest(format!("serializing JSON body: {e}")))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Bytes::from(body);
        Ok(self)
    }

    /// Mark this descriptor as the credential refresh call.
    pub fn into_refresh_call(mut self) -> Self {
        self.kind = RequestKind::Refresh;
        self
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn is_refresh_call(&self) -> bool {
        self.kind == RequestKind::Refresh
    }

    /// Whether this descriptor is already the single post-refresh replay.
    pub fn is_replay(&self) -> bool {
        self.replayed
    }

    /// Copy of this descriptor flagged as the replay.
    ///
    /// A replay is sent at most once per original request; the flag makes
    /// that bound visible to the pipeline instead of relying on recursion.
    pub fn to_replay(&self) -> Self {
        let mut replay = self.clone();
        replay.replayed = true;
        replay
    }
}

/// Response returned by a transport for any status code.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The single trigger condition for a credential refresh.
    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
