//! Session lifecycle: begin (login) and terminate (logout / refresh failure)
//!
//! Termination clears the credential store and fires the session-ended sink
//! exactly once per session. Two refresh failures racing each other, or a
//! refresh failure racing an explicit logout, produce one notification. The
//! "ended" flag is re-armed only by `begin()`.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credential::Credential;
use crate::error::Result;
use crate::store::CredentialStore;

/// Receiver of session lifecycle notifications.
///
/// Consumers typically flip health state or redirect to a login surface.
/// Both hooks run while the terminator's lock is held, so they are ordered
/// with respect to each other and must not block.
pub trait SessionSink: Send + Sync {
    fn session_ended(&self);

    /// A credential was stored by `SessionTerminator::begin`.
    fn session_started(&self) {}
}

impl<F> SessionSink for F
where
    F: Fn() + Send + Sync,
{
    fn session_ended(&self) {
        self()
    }
}

/// Clears credentials and notifies the sink, at most once per session.
pub struct SessionTerminator {
    store: Arc<dyn CredentialStore>,
    sink: Arc<dyn SessionSink>,
    ended: Mutex<bool>,
}

impl SessionTerminator {
    pub fn new(store: Arc<dyn CredentialStore>, sink: Arc<dyn SessionSink>) -> Self {
        Self {
            store,
            sink,
            ended: Mutex::new(false),
        }
    }

    /// Store a freshly issued credential and re-arm termination.
    pub async fn begin(&self, credential: Credential) -> Result<()> {
        let mut ended = self.ended.lock().await;
        let subject = credential.subject().map(str::to_owned);
        self.store.set(credential).await?;
        *ended = false;
        self.sink.session_started();
        info!(subject = subject.as_deref().unwrap_or("-"), "session established");
        Ok(())
    }

    /// Clear the store and notify the sink unless this session already ended.
    ///
    /// Never fails: a store that cannot be cleared is logged, and the sink is
    /// still notified so the application stops using the session.
    pub async fn terminate(&self) {
        let mut ended = self.ended.lock().await;

        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "failed to clear credential store during termination");
        }

        if *ended {
            debug!("session already ended, skipping notification");
            return;
        }

        *ended = true;
        warn!("session ended, credentials cleared");
        self.sink.session_ended();
    }

    pub async fn is_ended(&self) -> bool {
        *self.ended.lock().await
    }

    /// The store this terminator clears.
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }
}
