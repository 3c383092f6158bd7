//! Transport abstraction for outbound API calls
//!
//! Defines the `Transport` trait that decouples the credential pipeline from
//! the mechanism performing HTTP calls. `HttpTransport` is the production
//! implementation on top of `reqwest`; tests substitute scripted transports
//! implementing the same trait.
//!
//! A transport never interprets status codes. Every response, including 401
//! and 5xx, comes back as `Ok(Response)`; only failures to obtain a response
//! at all (timeouts, refused connections, broken bodies) are `TransportError`.

pub mod descriptor;
pub mod error;
pub mod http;

pub use descriptor::{RequestDescriptor, RequestKind, Response};
pub use error::{Result, TransportError};
pub use http::HttpTransport;

pub use bytes::Bytes;
pub use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
pub use reqwest::{Method, StatusCode};

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by dyn-compatible async traits in this workspace.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Performs a single outbound call.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    /// Send the request exactly once. No retries, no credential handling.
    fn send<'a>(&'a self, request: &'a RequestDescriptor) -> BoxFuture<'a, Result<Response>>;
}
