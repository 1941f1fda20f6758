//! ERP gateway configuration.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::credential::Credential;

/// Default User-Agent string for upstream requests
pub const DEFAULT_USER_AGENT: &str = concat!("erp-gateway/", env!("CARGO_PKG_VERSION"));

/// Standard idempotency key header name
pub const DEFAULT_IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document could not be parsed.
    #[error("invalid configuration document: {0}")]
    Parse(String),

    /// A field holds an unusable value.
    #[error("invalid configuration: {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// ERP gateway configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ErpGatewayConfig {
    /// Upstream base URL, e.g. `https://erp.example.com/api/v2`.
    pub base_url: String,

    /// API token presented on every upstream call (redacted in `Debug`).
    pub api_token: Credential,

    /// Header carrying the credential.
    pub auth_header: String,

    /// Scheme prefixed to the token; empty sends the raw token.
    pub auth_scheme: String,

    /// Minimum spacing between two upstream admissions.
    #[serde(deserialize_with = "humantime_duration::deserialize")]
    pub dispatch_interval: Duration,

    /// Deadline for a single upstream attempt, body included.
    #[serde(deserialize_with = "humantime_duration::deserialize")]
    pub request_timeout: Duration,

    /// User-Agent sent upstream.
    pub user_agent: String,

    /// Header used to forward the caller's dedup key upstream (`None` disables).
    pub idempotency_header: Option<String>,

    /// Maximum upstream response body size in bytes.
    pub max_response_body_bytes: usize,

    /// Permit a plain `http://` base URL (mock servers only).
    pub allow_insecure_http: bool,

    /// Retry policy.
    pub retry: RetrySettings,

    /// Deduplication cache policy.
    pub dedup: DedupSettings,
}

impl Default for ErpGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_token: Credential::default(),
            auth_header: "Authorization".to_owned(),
            auth_scheme: "Bearer".to_owned(),
            dispatch_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            idempotency_header: Some(DEFAULT_IDEMPOTENCY_HEADER.to_owned()),
            max_response_body_bytes: 8 * 1024 * 1024,
            allow_insecure_http: false,
            retry: RetrySettings::default(),
            dedup: DedupSettings::default(),
        }
    }
}

impl ErpGatewayConfig {
    /// Defaults with the given upstream and token.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_token: Credential) -> Self {
        Self {
            base_url: base_url.into(),
            api_token,
            ..Self::default()
        }
    }

    /// Parse and validate a YAML document.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the document is malformed, carries unknown
    /// fields, or fails [`validate`](Self::validate).
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_saphyr::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is usable.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base_url = self.base_url.trim();
        if base_url.is_empty() {
            return Err(ConfigError::invalid("base_url", "must not be empty"));
        }
        let uri: http::Uri = base_url
            .parse()
            .map_err(|e: http::uri::InvalidUri| ConfigError::invalid("base_url", e.to_string()))?;
        match uri.scheme_str() {
            Some("https") => {}
            Some("http") if self.allow_insecure_http => {}
            Some("http") => {
                return Err(ConfigError::invalid(
                    "base_url",
                    "plain http requires allow_insecure_http",
                ));
            }
            _ => {
                return Err(ConfigError::invalid(
                    "base_url",
                    "scheme must be http or https",
                ));
            }
        }
        if uri.authority().is_none() {
            return Err(ConfigError::invalid("base_url", "missing host"));
        }
        if self.api_token.is_empty() {
            return Err(ConfigError::invalid("api_token", "must not be empty"));
        }
        if http::HeaderName::from_bytes(self.auth_header.as_bytes()).is_err() {
            return Err(ConfigError::invalid("auth_header", "not a valid header name"));
        }
        if let Some(header) = &self.idempotency_header
            && http::HeaderName::from_bytes(header.as_bytes()).is_err()
        {
            return Err(ConfigError::invalid(
                "idempotency_header",
                "not a valid header name",
            ));
        }
        if self.dispatch_interval.is_zero() {
            return Err(ConfigError::invalid("dispatch_interval", "must be positive"));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid("request_timeout", "must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.dedup.max_entries == 0 {
            return Err(ConfigError::invalid("dedup.max_entries", "must be at least 1"));
        }
        Ok(())
    }
}

/// Retry policy settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    /// Total attempts per dispatch, the first one included.
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles for each later one.
    #[serde(deserialize_with = "humantime_duration::deserialize")]
    pub base_backoff: Duration,

    /// Upper bound for a single backoff delay.
    #[serde(deserialize_with = "humantime_duration::deserialize")]
    pub max_backoff: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Deduplication cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DedupSettings {
    /// How long a successful result stays replayable.
    #[serde(deserialize_with = "humantime_duration::deserialize")]
    pub ttl: Duration,

    /// Maximum number of remembered keys.
    pub max_entries: u64,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
            max_entries: 10_000,
        }
    }
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}
