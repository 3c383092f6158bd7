//! Common types for the token relay workspace

mod secret;
mod error;

pub use secret::Secret;
pub use error::{Error, Result};
