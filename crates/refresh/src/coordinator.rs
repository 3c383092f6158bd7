//! Single-flight refresh coordination
//!
//! The first caller to observe a 401 while no refresh is running becomes the
//! leader and spawns the refresh task; every caller arriving while that task
//! runs becomes a follower and waits on the same `watch` channel. The state
//! lives behind a `std::sync::Mutex` that is never held across an `.await`,
//! so the check-and-become-leader step is atomic with respect to all other
//! callers.
//!
//! The refresh itself runs in its own task. A leader whose request future is
//! dropped (client disconnect, caller timeout) therefore cannot strand its
//! followers, and a task that dies without producing an outcome resolves the
//! signal with a transport failure from its drop guard.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use credentials::{
    Credential, CredentialStore, RefreshResponse, SessionTerminator, now_millis, refresh_descriptor,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use transport::Transport;

use crate::error::RefreshError;
use crate::stats;

/// What every caller waiting on a refresh receives.
pub type RefreshOutcome = Result<Credential, RefreshError>;

type Signal = watch::Receiver<Option<RefreshOutcome>>;

enum RefreshState {
    Idle,
    Refreshing(Signal),
}

struct Shared {
    state: RefreshState,
    /// Number of refreshes that have settled
    epoch: u64,
    /// Outcome of the most recent settled refresh
    last: Option<RefreshOutcome>,
}

struct Inner {
    shared: Mutex<Shared>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    terminator: Arc<SessionTerminator>,
    refresh_url: String,
    timeout: Duration,
}

enum Role {
    Leader(Publisher, Signal),
    Follower(Signal),
    Settled(Credential),
}

/// Serializes refresh attempts so at most one refresh call is in flight.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        terminator: Arc<SessionTerminator>,
        refresh_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    state: RefreshState::Idle,
                    epoch: 0,
                    last: None,
                }),
                transport,
                store: terminator.store().clone(),
                terminator,
                refresh_url: refresh_url.into(),
                timeout,
            }),
        }
    }

    /// Obtain a fresh credential, starting a refresh or joining the running one.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.join_or_lead(None).await
    }

    /// Like `refresh`, for a caller whose request was sent at `epoch` (see
    /// `epoch()`) carrying access token `rejected` and came back 401.
    ///
    /// If a refresh succeeded after that request was sent and issued a
    /// different access token, that credential is returned without another
    /// refresh call. A settled failure is never reused: the session it ended
    /// may have been replaced by a login since, so a new refresh runs against
    /// whatever the store holds now.
    pub async fn refresh_since(&self, epoch: u64, rejected: Option<&str>) -> RefreshOutcome {
        self.join_or_lead(Some((epoch, rejected))).await
    }

    /// Number of refreshes settled so far. Read before sending a request.
    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(self.inner.lock().state, RefreshState::Refreshing(_))
    }

    async fn join_or_lead(&self, seen: Option<(u64, Option<&str>)>) -> RefreshOutcome {
        let mut signal = match self.elect(seen) {
            Role::Settled(credential) => return Ok(credential),
            Role::Follower(signal) => signal,
            Role::Leader(publisher, signal) => {
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    let outcome = inner.perform().await;
                    if let Err(e) = &outcome {
                        warn!(reason = e.label(), error = %e, "credential refresh failed, ending session");
                        inner.terminator.terminate().await;
                    }
                    publisher.publish(outcome);
                });
                signal
            }
        };

        match signal.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone().unwrap_or_else(|| {
                Err(RefreshError::TransportFailure("refresh signal resolved empty".into()))
            }),
            Err(_) => Err(RefreshError::TransportFailure(
                "refresh task dropped before resolving".into(),
            )),
        }
    }

    /// Decide this caller's role under the state lock.
    fn elect(&self, seen: Option<(u64, Option<&str>)>) -> Role {
        let mut shared = self.inner.lock();

        if let RefreshState::Refreshing(signal) = &shared.state {
            stats::record_refresh_joined();
            debug!("refresh in flight, waiting for its outcome");
            return Role::Follower(signal.clone());
        }

        if let Some((seen, rejected)) = seen
            && shared.epoch > seen
            && let Some(Ok(credential)) = &shared.last
            && credential.access() != rejected
        {
            debug!(seen, epoch = shared.epoch, "refresh settled after request was sent, reusing credential");
            return Role::Settled(credential.clone());
        }

        let (tx, rx) = watch::channel(None);
        shared.state = RefreshState::Refreshing(rx.clone());
        stats::record_refresh_started();
        info!(epoch = shared.epoch, "starting credential refresh");

        Role::Leader(
            Publisher {
                inner: self.inner.clone(),
                tx: Some(tx),
            },
            rx,
        )
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The refresh call proper. Runs only in the leader's spawned task.
    async fn perform(&self) -> RefreshOutcome {
        let Some(previous) = self.store.get().await else {
            warn!("no credential stored, cannot refresh");
            return Err(RefreshError::NoRefreshToken);
        };
        let Some(refresh_token) = previous.refresh() else {
            warn!("credential has no refresh token, cannot refresh");
            return Err(RefreshError::NoRefreshToken);
        };

        let request = refresh_descriptor(&self.refresh_url, refresh_token)
            .map_err(|e| RefreshError::TransportFailure(e.to_string()))?;

        let response = match tokio::time::timeout(self.timeout, self.transport.send(&request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(RefreshError::TransportFailure(e.to_string())),
            Err(_) => {
                return Err(RefreshError::TransportFailure(format!(
                    "refresh call timed out after {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        if !response.is_success() {
            return Err(RefreshError::RefreshRejected(format!(
                "refresh endpoint returned {}",
                response.status
            )));
        }

        let body = RefreshResponse::from_response(&response)
            .map_err(|e| RefreshError::RefreshRejected(e.to_string()))?;
        let credential = previous.refreshed(body, now_millis());

        if let Err(e) = self.store.set(credential.clone()).await {
            warn!(error = %e, "failed to persist refreshed credential");
        }
        info!(
            subject = credential.subject().unwrap_or("-"),
            "credential refresh succeeded"
        );
        Ok(credential)
    }
}

/// Resolves the leader's signal and returns the coordinator to `Idle`.
///
/// Dropping it unresolved (refresh task panicked or was never polled)
/// resolves the signal with a transport failure.
struct Publisher {
    inner: Arc<Inner>,
    tx: Option<watch::Sender<Option<RefreshOutcome>>>,
}

impl Publisher {
    fn publish(mut self, outcome: RefreshOutcome) {
        self.settle(outcome);
    }

    fn settle(&mut self, outcome: RefreshOutcome) {
        let Some(tx) = self.tx.take() else {
            return;
        };

        let label = match &outcome {
            Ok(_) => "success",
            Err(e) => e.label(),
        };

        let mut shared = self.inner.lock();
        shared.state = RefreshState::Idle;
        shared.epoch += 1;
        shared.last = Some(outcome.clone());
        tx.send_replace(Some(outcome));
        drop(shared);

        stats::record_refresh_completed(label);
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if self.tx.is_some() {
            error!("refresh task ended without an outcome");
            self.settle(Err(RefreshError::TransportFailure(
                "refresh task aborted".into(),
            )));
        }
    }
}
