//! Runtime counters and session health shared by the relay handlers

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use credentials::SessionSink;
use tracing::info;

/// Maximum time to wait for in-flight requests after a shutdown signal
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime metrics tracked while the service is running
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    /// Requests currently being relayed, reported if the drain times out
    pub in_flight: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

/// Decrements `in_flight` when a relayed request finishes, however it ends.
pub struct InFlightGuard(Arc<AtomicU64>);

impl InFlightGuard {
    pub fn enter(counter: &Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Whether the relay currently holds a usable session.
///
/// Installed as the terminator's `SessionSink`, so it flips under the same
/// lock that stores or clears the credential; `/health` and the admin API
/// read it.
#[derive(Debug, Clone)]
pub struct SessionMonitor {
    active: Arc<AtomicBool>,
    ended_total: Arc<AtomicU64>,
}

impl SessionMonitor {
    pub fn new(active: bool) -> Self {
        crate::metrics::set_session_active(active);
        Self {
            active: Arc::new(AtomicBool::new(active)),
            ended_total: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn mark_active(&self) {
        self.active.store(true, Ordering::SeqCst);
        crate::metrics::set_session_active(true);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn ended_total(&self) -> u64 {
        self.ended_total.load(Ordering::Relaxed)
    }
}

impl SessionSink for SessionMonitor {
    fn session_ended(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.ended_total.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_session_ended();
        crate::metrics::set_session_active(false);
        info!("session ended, relay requests will be rejected until next login");
    }

    fn session_started(&self) {
        self.mark_active();
    }
}
