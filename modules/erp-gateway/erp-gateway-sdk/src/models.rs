//! ERP gateway models.
//!
//! Transport-agnostic; payloads are opaque JSON values.

use serde_json::Value;

/// HTTP method accepted by the upstream ERP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    /// Convert to uppercase string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }

    /// Whether repeating the call has no additional upstream effect.
    #[must_use]
    pub const fn is_idempotent(self) -> bool {
        matches!(self, Self::Get)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One operation to forward to the upstream ERP.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayRequest {
    /// Upstream path, relative to the configured base URL.
    pub path: String,
    /// HTTP method.
    pub method: HttpMethod,
    /// Query parameters, sent URL-encoded in order.
    pub query: Vec<(String, String)>,
    /// JSON body (POST payloads).
    pub body: Option<Value>,
    /// Caller-supplied deduplication key.
    pub dedup_key: Option<String>,
}

impl GatewayRequest {
    /// Create a request with no query, body or dedup key.
    #[must_use]
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            query: Vec::new(),
            body: None,
            dedup_key: None,
        }
    }

    /// Create a GET request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    /// Create a POST request carrying a JSON body.
    #[must_use]
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::new(HttpMethod::Post, path)
        }
    }

    /// Append a query parameter.
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Set the deduplication key.
    #[must_use]
    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    /// The deduplication key, if one was supplied and is not blank.
    #[must_use]
    pub fn effective_dedup_key(&self) -> Option<&str> {
        self.dedup_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// Successful upstream result.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    /// Upstream HTTP status (2xx).
    pub status: u16,
    /// Decoded JSON body; `Null` when the upstream sent no body.
    pub body: Value,
    /// Number of upstream attempts the result took (1-based).
    pub attempts: u32,
    /// True when served from the deduplication cache instead of a new dispatch.
    pub deduplicated: bool,
}
