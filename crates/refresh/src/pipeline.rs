//! Outbound request pipeline
//!
//! Attaches the stored credential to every request, absorbs server-initiated
//! token rotation, and on a 401 waits for the coordinator's refresh before
//! replaying the request exactly once.

use std::sync::Arc;

use credentials::{
    Credential, CredentialStore, ROTATED_ACCESS_HEADER, ROTATED_REFRESH_HEADER,
    SessionTerminator, now_millis,
};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use transport::{HeaderMap, HeaderName, HeaderValue, RequestDescriptor, Response, Transport};

use crate::config::PipelineConfig;
use crate::coordinator::RefreshCoordinator;
use crate::error::RequestError;
use crate::stats;

const AUTHORIZATION: HeaderName = HeaderName::from_static("authorization");

/// Sends requests with credentials attached and recovers from expired ones.
pub struct RequestPipeline {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    terminator: Arc<SessionTerminator>,
    coordinator: RefreshCoordinator,
    config: PipelineConfig,
}

impl RequestPipeline {
    /// Build a pipeline whose coordinator refreshes through the same transport.
    ///
    /// The credential store is the one `terminator` clears.
    pub fn new(
        transport: Arc<dyn Transport>,
        terminator: Arc<SessionTerminator>,
        config: PipelineConfig,
    ) -> Self {
        let coordinator = RefreshCoordinator::new(
            transport.clone(),
            terminator.clone(),
            config.refresh_url.clone(),
            config.refresh_timeout,
        );
        Self {
            transport,
            store: terminator.store().clone(),
            terminator,
            coordinator,
            config,
        }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Send `request`, refreshing and replaying once on a 401.
    ///
    /// Non-401 responses are returned as-is, whatever their status. Returns
    /// `RequestError::Unauthenticated` when the refresh fails, when the
    /// replay is rejected again, or when the request is itself the refresh
    /// call. The session has ended by the time any of these is returned.
    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    pub async fn send(&self, request: RequestDescriptor) -> Result<Response, RequestError> {
        let started = Instant::now();
        let result = self.dispatch(&request).await;

        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        let status = result.as_ref().map(|r| r.status.as_u16()).unwrap_or(0);
        if elapsed > self.config.slow_request_threshold {
            warn!(elapsed_ms, status, "slow request");
        } else {
            debug!(elapsed_ms, status, "request completed");
        }

        result
    }

    async fn dispatch(&self, request: &RequestDescriptor) -> Result<Response, RequestError> {
        // Epoch before credential. A refresh settling in between is seen as
        // newer than this request, so the access token actually sent goes to
        // the coordinator too: it never hands back the credential a 401 just
        // rejected.
        let epoch = self.coordinator.epoch();
        let credential = self.store.get().await;
        let sent_access = credential.as_ref().and_then(Credential::access);

        let outbound = self.attach(request, credential.as_ref());
        let response = self.transport.send(&outbound).await?;

        if !response.is_unauthorized() {
            self.absorb_rotation(&response).await;
            return Ok(response);
        }

        if self.is_refresh_call(request) {
            warn!("refresh call rejected with 401, ending session");
            self.terminator.terminate().await;
            return Err(RequestError::Unauthenticated);
        }
        if request.is_replay() {
            self.terminator.terminate().await;
            return Err(RequestError::Unauthenticated);
        }

        debug!(epoch, "received 401, waiting for refreshed credential");
        let fresh = match self.coordinator.refresh_since(epoch, sent_access).await {
            Ok(credential) => credential,
            Err(e) => {
                debug!(reason = e.label(), "refresh failed, request abandoned");
                stats::record_replay("abandoned");
                return Err(RequestError::Unauthenticated);
            }
        };

        let replay = self.attach(&request.to_replay(), Some(&fresh));
        let response = self.transport.send(&replay).await?;
        if response.is_unauthorized() {
            warn!("replay rejected with 401 after refresh, ending session");
            stats::record_replay("rejected");
            self.terminator.terminate().await;
            return Err(RequestError::Unauthenticated);
        }

        stats::record_replay("sent");
        self.absorb_rotation(&response).await;
        Ok(response)
    }

    fn is_refresh_call(&self, request: &RequestDescriptor) -> bool {
        request.is_refresh_call() || same_endpoint(&request.url, &self.config.refresh_url)
    }

    /// Copy of `request` carrying `credential`'s headers.
    ///
    /// The refresh call never carries the access token.
    fn attach(&self, request: &RequestDescriptor, credential: Option<&Credential>) -> RequestDescriptor {
        let mut outbound = request.clone();
        let Some(credential) = credential else {
            return outbound;
        };
        if self.is_refresh_call(request) {
            return outbound;
        }

        let headers = &mut outbound.headers;
        if let Some(access) = credential.access() {
            insert_header(headers, AUTHORIZATION, &format!("Bearer {access}"), true);
        }
        if let (Some(name), Some(subject)) = (&self.config.subject_header, credential.subject()) {
            insert_header(headers, name.clone(), subject, false);
        }
        if let (Some(name), Some(refresh)) =
            (&self.config.refresh_token_header, credential.refresh())
        {
            insert_header(headers, name.clone(), refresh, true);
        }
        outbound
    }

    /// Store tokens the server rotated via response headers.
    async fn absorb_rotation(&self, response: &Response) {
        if !response.is_success() {
            return;
        }
        let access = response.header_str(ROTATED_ACCESS_HEADER);
        let refresh = response.header_str(ROTATED_REFRESH_HEADER);
        if access.is_none() && refresh.is_none() {
            return;
        }

        let current = self.store.get().await;
        let Some(rotated) = Credential::rotate(current.as_ref(), access, refresh, now_millis())
        else {
            return;
        };
        if current.as_ref().is_some_and(|c| {
            c.access_token == rotated.access_token && c.refresh_token == rotated.refresh_token
        }) {
            return;
        }

        match self.store.set(rotated).await {
            Ok(()) => {
                stats::record_rotation();
                debug!(
                    access_rotated = access.is_some(),
                    refresh_rotated = refresh.is_some(),
                    "stored server-rotated credential"
                );
            }
            Err(e) => warn!(error = %e, "failed to persist rotated credential"),
        }
    }
}

/// Whether `url` addresses `endpoint`, ignoring query, fragment and a
/// trailing slash.
fn same_endpoint(url: &str, endpoint: &str) -> bool {
    fn base(url: &str) -> &str {
        let end = url.find(['?', '#']).unwrap_or(url.len());
        url[..end].trim_end_matches('/')
    }
    base(url) == base(endpoint)
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str, sensitive: bool) {
    match HeaderValue::from_str(value) {
        Ok(mut value) => {
            value.set_sensitive(sensitive);
            headers.insert(name, value);
        }
        Err(e) => warn!(header = %name, error = %e, "skipping credential header with invalid value"),
    }
}
