//! Single-flight credential refresh and the request pipeline built on it
//!
//! Every outbound call goes through `RequestPipeline::send`, which attaches
//! the current credential, and on a 401 asks the `RefreshCoordinator` for a
//! fresh one. The coordinator guarantees that concurrent 401s produce exactly
//! one refresh call; all waiting callers observe that call's outcome and
//! replay their original request once.
//!
//! Refresh lifecycle:
//! 1. First 401 while `Idle` → caller becomes leader, state `Refreshing`
//! 2. Later 401s while `Refreshing` → callers wait on the leader's signal
//! 3. Leader's refresh task succeeds → store updated, signal resolved, `Idle`
//! 4. Leader's refresh task fails → session terminated, signal resolved, `Idle`
//! 5. Waiters replay once with the new credential, or return `Unauthenticated`

pub mod config;
pub mod coordinator;
pub mod error;
pub mod pipeline;
pub mod stats;

#[cfg(test)]
mod testing;

pub use config::PipelineConfig;
pub use coordinator::{RefreshCoordinator, RefreshOutcome};
pub use error::{RefreshError, RequestError};
pub use pipeline::RequestPipeline;
