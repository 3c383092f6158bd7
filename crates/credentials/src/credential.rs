//! The credential value
//!
//! A `Credential` is replaced wholesale, never edited in place: refresh and
//! rotation both produce a new value from the previous one.

use common::Secret;
use serde::{Deserialize, Serialize};

use crate::refresh_call::RefreshResponse;

/// Access/refresh token pair plus the identity it belongs to.
///
/// `issued_at` is a unix timestamp in milliseconds. An empty access token is
/// treated as "no access token"; an empty or missing refresh token as
/// "nothing to refresh with".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: Secret<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<Secret<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    pub issued_at: u64,
}

impl Credential {
    /// Credential with only an access token, issued now.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Secret::new(access_token.into()),
            refresh_token: None,
            subject_id: None,
            issued_at: now_millis(),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(Secret::new(refresh_token.into()));
        self
    }

    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn with_issued_at(mut self, issued_at: u64) -> Self {
        self.issued_at = issued_at;
        self
    }

    /// Access token, if non-empty.
    pub fn access(&self) -> Option<&str> {
        non_empty(self.access_token.expose())
    }

    /// Refresh token, if present and non-empty.
    pub fn refresh(&self) -> Option<&str> {
        self.refresh_token
            .as_ref()
            .and_then(|token| non_empty(token.expose()))
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject_id.as_deref().and_then(non_empty)
    }

    /// Build the successor of `self` from a refresh response.
    ///
    /// The refresh token is kept when the server does not issue a new one.
    pub fn refreshed(&self, response: RefreshResponse, now: u64) -> Credential {
        let refresh_token = match response.refresh_token.filter(|t| !t.is_empty()) {
            Some(new) => Some(Secret::new(new)),
            None => self.refresh_token.clone(),
        };
        Credential {
            access_token: Secret::new(response.access_token),
            refresh_token,
            subject_id: self.subject_id.clone(),
            issued_at: now,
        }
    }

    /// Apply a server-initiated rotation to the current credential.
    ///
    /// Either token may be rotated independently. Returns `None` when neither
    /// header carried a value, i.e. there is nothing to write.
    pub fn rotate(
        current: Option<&Credential>,
        access: Option<&str>,
        refresh: Option<&str>,
        now: u64,
    ) -> Option<Credential> {
        let access = access.and_then(non_empty);
        let refresh = refresh.and_then(non_empty);
        if access.is_none() && refresh.is_none() {
            return None;
        }

        let access_token = match (access, current) {
            (Some(new), _) => Secret::new(new.to_string()),
            (None, Some(existing)) => existing.access_token.clone(),
            (None, None) => Secret::new(String::new()),
        };
        let refresh_token = match refresh {
            Some(new) => Some(Secret::new(new.to_string())),
            None => current.and_then(|c| c.refresh_token.clone()),
        };

        Some(Credential {
            access_token,
            refresh_token,
            subject_id: current.and_then(|c| c.subject_id.clone()),
            issued_at: now,
        })
    }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() { None } else { Some(s) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential() -> Credential {
        Credential::new("A1")
            .with_refresh_token("R1")
            .with_subject("user-42")
            .with_issued_at(1_000)
    }

    #[test]
    fn empty_tokens_read_as_absent() {
        let cred = Credential::new("").with_refresh_token("").with_subject("");
        assert_eq!(cred.access(), None);
        assert_eq!(cred.refresh(), None);
        assert_eq!(cred.subject(), None);
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let debug = format!("{:?}", credential());
        assert!(!debug.contains("A1"), "access token leaked: {debug}");
        assert!(!debug.contains("R1"), "refresh token leaked: {debug}");
        assert!(debug.contains("user-42"));
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(credential()).unwrap();
        assert_eq!(json["accessToken"], "A1");
        assert_eq!(json["refreshToken"], "R1");
        assert_eq!(json["subjectId"], "user-42");
        assert_eq!(json["issuedAt"], 1_000);

        let bare: Credential =
            serde_json::from_str(r#"{"accessToken":"A1","issuedAt":5}"#).unwrap();
        assert!(bare.refresh_token.is_none());
        assert!(bare.subject_id.is_none());
    }

    #[test]
    fn refreshed_replaces_both_tokens() {
        let next = credential().refreshed(
            RefreshResponse {
                access_token: "A2".into(),
                refresh_token: Some("R2".into()),
            },
            2_000,
        );
        assert_eq!(next.access(), Some("A2"));
        assert_eq!(next.refresh(), Some("R2"));
        assert_eq!(next.subject(), Some("user-42"));
        assert_eq!(next.issued_at, 2_000);
    }

    #[test]
    fn refreshed_keeps_previous_refresh_token_when_not_reissued() {
        let next = credential().refreshed(
            RefreshResponse {
                access_token: "A2".into(),
                refresh_token: None,
            },
            2_000,
        );
        assert_eq!(next.access(), Some("A2"));
        assert_eq!(next.refresh(), Some("R1"));
    }

    #[test]
    fn rotate_without_headers_is_noop() {
        assert!(Credential::rotate(Some(&credential()), None, Some(""), 9).is_none());
    }

    #[test]
    fn rotate_access_only_keeps_refresh_and_subject() {
        let current = credential();
        let rotated = Credential::rotate(Some(&current), Some("A9"), None, 9).unwrap();
        assert_eq!(rotated.access(), Some("A9"));
        assert_eq!(rotated.refresh(), Some("R1"));
        assert_eq!(rotated.subject(), Some("user-42"));
        assert_eq!(rotated.issued_at, 9);
    }

    #[test]
    fn rotate_refresh_only_without_current() {
        let rotated = Credential::rotate(None, None, Some("R9"), 9).unwrap();
        assert_eq!(rotated.access(), None);
        assert_eq!(rotated.refresh(), Some("R9"));
    }
}
