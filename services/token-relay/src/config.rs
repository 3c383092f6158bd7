//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The bootstrap refresh token is loaded from the RELAY_REFRESH_TOKEN env var
//! or refresh_token_file, never stored in the TOML directly to avoid leaking
//! secrets.

use common::Secret;
use refresh::PipelineConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use transport::HeaderName;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub relay: RelayConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// HTTP relay settings
#[derive(Debug, Deserialize)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    /// Separate listener for the admin API; disabled when absent
    #[serde(default)]
    pub admin_addr: Option<SocketAddr>,
    pub upstream_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Credential and refresh settings
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Refresh endpoint path, appended to `upstream_url`
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    /// Absolute refresh URL; overrides `refresh_path` when set
    #[serde(default)]
    pub refresh_url: Option<String>,
    #[serde(default = "default_refresh_timeout_ms")]
    pub refresh_timeout_ms: u64,
    #[serde(default = "default_slow_request_ms")]
    pub slow_request_ms: u64,
    /// Identity header name; empty string disables it
    #[serde(default = "default_subject_header")]
    pub subject_header: String,
    /// Mirror the refresh token on every call under this header name
    #[serde(default)]
    pub refresh_token_header: Option<String>,
    /// Persist credentials to this JSON file; in-memory when absent
    #[serde(default)]
    pub credential_file: Option<PathBuf>,
    /// Path to a file containing a bootstrap refresh token
    #[serde(default)]
    pub refresh_token_file: Option<PathBuf>,
    #[serde(skip)]
    pub refresh_token: Option<Secret<String>>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_path: default_refresh_path(),
            refresh_url: None,
            refresh_timeout_ms: default_refresh_timeout_ms(),
            slow_request_ms: default_slow_request_ms(),
            subject_header: default_subject_header(),
            refresh_token_header: None,
            credential_file: None,
            refresh_token_file: None,
            refresh_token: None,
        }
    }
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_refresh_path() -> String {
    credentials::REFRESH_PATH.to_string()
}

fn default_refresh_timeout_ms() -> u64 {
    credentials::DEFAULT_REFRESH_TIMEOUT.as_millis() as u64
}

fn default_slow_request_ms() -> u64 {
    credentials::SLOW_REQUEST_THRESHOLD.as_millis() as u64
}

fn default_subject_header() -> String {
    credentials::SUBJECT_HEADER.to_string()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Refresh token resolution order:
    /// 1. RELAY_REFRESH_TOKEN env var
    /// 2. refresh_token_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| common::Error::read(path, e))?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("UPSTREAM_URL") {
            config.relay.upstream_url = url;
        }

        validate_url("upstream_url", &config.relay.upstream_url)?;
        if let Some(url) = &config.session.refresh_url {
            validate_url("refresh_url", url)?;
        }

        if config.relay.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.relay.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.session.refresh_timeout_ms == 0 {
            return Err(common::Error::Config(
                "refresh_timeout_ms must be greater than 0".into(),
            ));
        }

        // Header names are parsed once here so a typo fails at startup
        config.pipeline_config()?;

        if let Ok(token) = std::env::var("RELAY_REFRESH_TOKEN") {
            config.session.refresh_token = Some(Secret::new(token));
        } else if let Some(ref token_file) = config.session.refresh_token_file {
            let token = std::fs::read_to_string(token_file)
                .map_err(|e| common::Error::read(token_file, e))?;
            let token = token.trim().to_owned();
            if !token.is_empty() {
                config.session.refresh_token = Some(Secret::new(token));
            }
        }

        Ok(config)
    }

    /// Typed pipeline settings derived from the `[session]` table.
    pub fn pipeline_config(&self) -> common::Result<PipelineConfig> {
        let refresh_url = match &self.session.refresh_url {
            Some(url) => url.clone(),
            None => format!(
                "{}{}",
                self.relay.upstream_url.trim_end_matches('/'),
                self.session.refresh_path
            ),
        };

        let mut pipeline = PipelineConfig::new(refresh_url)
            .with_refresh_timeout(Duration::from_millis(self.session.refresh_timeout_ms));
        pipeline.slow_request_threshold = Duration::from_millis(self.session.slow_request_ms);
        pipeline.subject_header = parse_header_name("subject_header", &self.session.subject_header)?;
        pipeline.refresh_token_header = match &self.session.refresh_token_header {
            Some(name) => parse_header_name("refresh_token_header", name)?,
            None => None,
        };
        Ok(pipeline)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("token-relay.toml")
    }
}

fn validate_url(field: &str, url: &str) -> common::Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(());
    }
    Err(common::Error::Config(format!(
        "{field} must start with http:// or https://, got: {url}"
    )))
}

fn parse_header_name(field: &str, name: &str) -> common::Result<Option<HeaderName>> {
    if name.is_empty() {
        return Ok(None);
    }
    HeaderName::from_bytes(name.as_bytes())
        .map(Some)
        .map_err(|e| common::Error::Config(format!("{field} is not a valid header name: {e}")))
}
