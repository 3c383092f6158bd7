//! Credential state for the token relay
//!
//! Owns everything the request pipeline needs to know about "who we are":
//! the `Credential` value, where it is persisted (`CredentialStore`), the wire
//! format of the refresh call, and how a session ends (`SessionTerminator`).
//! This crate has no notion of concurrency control around refreshes; that
//! lives in the `refresh` crate.
//!
//! Credential flow:
//! 1. Login stores a credential via `SessionTerminator::begin()`
//! 2. The pipeline reads it with `CredentialStore::get()` for every call
//! 3. Server-initiated rotation replaces it via `Credential::rotate()`
//! 4. A refresh builds a request with `refresh_descriptor()` and replaces it
//!    via `Credential::refreshed()`
//! 5. Unrecoverable failure or logout clears it via `SessionTerminator::terminate()`

pub mod constants;
pub mod credential;
pub mod error;
pub mod refresh_call;
pub mod session;
pub mod store;

pub use constants::*;
pub use credential::{Credential, now_millis};
pub use error::{Error, Result};
pub use refresh_call::{RefreshRequest, RefreshResponse, refresh_descriptor};
pub use session::{SessionSink, SessionTerminator};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
