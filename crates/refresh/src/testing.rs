//! In-process API double shared by coordinator and pipeline tests.
//!
//! Protected endpoints accept only the access token most recently issued by
//! the refresh endpoint. The n-th refresh call issues `A{n+1}` / `R{n+1}`, so
//! a store seeded with `A1` / `R1` sees `A2` / `R2` after the first refresh.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use credentials::{
    Credential, CredentialStore, MemoryCredentialStore, ROTATED_ACCESS_HEADER,
    ROTATED_REFRESH_HEADER, SessionSink, SessionTerminator,
};
use transport::{
    BoxFuture, HeaderValue, RequestDescriptor, Response, StatusCode, Transport, TransportError,
};

#[derive(Debug, Clone, Copy)]
pub(crate) enum RefreshBehavior {
    Issue,
    Reject(StatusCode),
    Garbage,
    Fail,
    Hang,
    Panic,
}

pub(crate) struct FakeApi {
    valid_access: Mutex<Option<String>>,
    refresh: Mutex<RefreshBehavior>,
    rotate_to: Mutex<Option<(String, String)>>,
    refresh_calls: AtomicUsize,
    refresh_tokens: Mutex<Vec<String>>,
    authorizations: Mutex<Vec<Option<String>>>,
    /// When set, protected endpoints reject every token
    reject_all: Mutex<bool>,
}

impl FakeApi {
    pub const BASE: &'static str = "https://api.test";
    pub const REFRESH_URL: &'static str = "https://api.test/refresh-token";
    pub const REFRESH_LATENCY: Duration = Duration::from_millis(100);

    pub fn new() -> Self {
        Self {
            valid_access: Mutex::new(None),
            refresh: Mutex::new(RefreshBehavior::Issue),
            rotate_to: Mutex::new(None),
            refresh_calls: AtomicUsize::new(0),
            refresh_tokens: Mutex::new(vec![]),
            authorizations: Mutex::new(vec![]),
            reject_all: Mutex::new(false),
        }
    }

    pub fn url(path: &str) -> String {
        format!("{}{path}", Self::BASE)
    }

    pub fn set_refresh(&self, behavior: RefreshBehavior) {
        *self.refresh.lock().unwrap() = behavior;
    }

    /// Accept `token` on protected endpoints until the next refresh.
    pub fn accept(&self, token: &str) {
        *self.valid_access.lock().unwrap() = Some(token.to_string());
    }

    /// Invalidate every access token issued so far.
    pub fn expire(&self) {
        *self.valid_access.lock().unwrap() = None;
    }

    pub fn reject_all(&self) {
        *self.reject_all.lock().unwrap() = true;
    }

    /// Rotate to the given pair on the next successful protected response.
    pub fn rotate_on_next_success(&self, access: &str, refresh: &str) {
        *self.rotate_to.lock().unwrap() = Some((access.to_string(), refresh.to_string()));
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.refresh_tokens.lock().unwrap().clone()
    }

    /// `Authorization` header of every non-refresh request, in arrival order.
    pub fn authorizations(&self) -> Vec<Option<String>> {
        self.authorizations.lock().unwrap().clone()
    }

    async fn handle_refresh(&self, request: &RequestDescriptor) -> transport::Result<Response> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap_or_default();
        if let Some(token) = body["refreshToken"].as_str() {
            self.refresh_tokens.lock().unwrap().push(token.to_string());
        }

        tokio::time::sleep(Self::REFRESH_LATENCY).await;

        let behavior = *self.refresh.lock().unwrap();
        match behavior {
            RefreshBehavior::Issue => {
                let access = format!("A{}", n + 1);
                self.accept(&access);
                let body = serde_json::json!({
                    "message": "token refreshed",
                    "accessToken": access,
                    "refreshToken": format!("R{}", n + 1),
                });
                Ok(Response::new(StatusCode::OK).with_body(body.to_string()))
            }
            RefreshBehavior::Reject(status) => Ok(Response::new(status)),
            RefreshBehavior::Garbage => Ok(Response::new(StatusCode::OK).with_body("<html>")),
            RefreshBehavior::Fail => Err(TransportError::Connect("connection refused".into())),
            RefreshBehavior::Hang => std::future::pending().await,
            RefreshBehavior::Panic => panic!("refresh endpoint exploded"),
        }
    }

    fn handle_protected(&self, request: &RequestDescriptor) -> transport::Result<Response> {
        let auth = request
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        self.authorizations.lock().unwrap().push(auth.clone());

        if request.url.ends_with("/down") {
            return Err(TransportError::Connect("connection refused".into()));
        }
        if request.url.ends_with("/boom") {
            return Ok(Response::new(StatusCode::INTERNAL_SERVER_ERROR).with_body("boom"));
        }

        let expected = self
            .valid_access
            .lock()
            .unwrap()
            .as_ref()
            .map(|token| format!("Bearer {token}"));
        let authorized =
            !*self.reject_all.lock().unwrap() && expected.is_some() && auth == expected;
        if !authorized {
            return Ok(Response::new(StatusCode::UNAUTHORIZED));
        }

        let mut response = Response::new(StatusCode::OK).with_body("ok");
        if let Some((access, refresh)) = self.rotate_to.lock().unwrap().take() {
            self.accept(&access);
            response = response
                .with_header(
                    ROTATED_ACCESS_HEADER.parse().unwrap(),
                    HeaderValue::from_str(&access).unwrap(),
                )
                .with_header(
                    ROTATED_REFRESH_HEADER.parse().unwrap(),
                    HeaderValue::from_str(&refresh).unwrap(),
                );
        }
        Ok(response)
    }
}

impl Transport for FakeApi {
    fn send<'a>(&'a self, request: &'a RequestDescriptor) -> BoxFuture<'a, transport::Result<Response>> {
        Box::pin(async move {
            if request.url.starts_with(Self::REFRESH_URL) {
                self.handle_refresh(request).await
            } else {
                self.handle_protected(request)
            }
        })
    }
}

pub(crate) struct Harness {
    pub api: Arc<FakeApi>,
    pub store: Arc<dyn CredentialStore>,
    pub terminator: Arc<SessionTerminator>,
    ended: Arc<AtomicUsize>,
}

impl Harness {
    /// Session-ended notifications so far.
    pub fn ended(&self) -> usize {
        self.ended.load(Ordering::SeqCst)
    }
}

/// Fake API plus a memory store seeded with `initial`.
///
/// If `initial` carries an access token, the API accepts it until the first
/// refresh or `expire()`.
pub(crate) fn harness(initial: Option<Credential>) -> Harness {
    let api = Arc::new(FakeApi::new());
    let store: Arc<dyn CredentialStore> = match initial {
        Some(credential) => {
            if let Some(access) = credential.access() {
                api.accept(access);
            }
            Arc::new(MemoryCredentialStore::with_credential(credential))
        }
        None => Arc::new(MemoryCredentialStore::new()),
    };

    let ended = Arc::new(AtomicUsize::new(0));
    let sink_count = ended.clone();
    let sink: Arc<dyn SessionSink> = Arc::new(move || {
        sink_count.fetch_add(1, Ordering::SeqCst);
    });

    Harness {
        api,
        terminator: Arc::new(SessionTerminator::new(store.clone(), sink)),
        store,
        ended,
    }
}
