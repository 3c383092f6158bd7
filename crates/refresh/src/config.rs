//! Pipeline configuration

use std::time::Duration;

use credentials::{DEFAULT_REFRESH_TIMEOUT, REFRESH_PATH, SLOW_REQUEST_THRESHOLD, SUBJECT_HEADER};
use transport::HeaderName;

/// Settings for one pipeline and its coordinator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Absolute URL of the refresh endpoint
    pub refresh_url: String,
    /// Bound on the refresh call; exceeding it is a transport failure
    pub refresh_timeout: Duration,
    /// Requests slower than this are logged at warn level
    pub slow_request_threshold: Duration,
    /// Header mirroring `Credential::subject_id`, if any
    pub subject_header: Option<HeaderName>,
    /// Header mirroring the refresh token on every call, if any
    pub refresh_token_header: Option<HeaderName>,
}

impl PipelineConfig {
    pub fn new(refresh_url: impl Into<String>) -> Self {
        Self {
            refresh_url: refresh_url.into(),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            slow_request_threshold: SLOW_REQUEST_THRESHOLD,
            subject_header: Some(HeaderName::from_static(SUBJECT_HEADER)),
            refresh_token_header: None,
        }
    }

    /// Config for an API whose refresh endpoint sits at the default path.
    pub fn for_api(base_url: &str) -> Self {
        Self::new(format!("{}{}", base_url.trim_end_matches('/'), REFRESH_PATH))
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_api_appends_refresh_path() {
        let config = PipelineConfig::for_api("https://api.example.com/");
        assert_eq!(config.refresh_url, "https://api.example.com/refresh-token");
        assert_eq!(config.refresh_timeout, Duration::from_secs(10));
        assert_eq!(config.subject_header.unwrap().as_str(), "x-user-id");
        assert!(config.refresh_token_header.is_none());
    }
}
