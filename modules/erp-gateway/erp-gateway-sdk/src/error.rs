//! ERP gateway error types.
//!
//! Transport-agnostic failure taxonomy surfaced to the route layer.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Category of a final gateway failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Upstream refused the configured credential (401/403). Never retried;
    /// the operator must rotate the credential.
    CredentialRejected,
    /// Upstream kept answering 429 until the attempt ceiling was reached.
    RateLimited,
    /// Upstream kept failing with 5xx until the attempt ceiling was reached.
    TransientUpstreamFailure,
    /// Upstream rejected the request payload (non-retryable status).
    UpstreamRejected,
    /// Connectivity failure or attempt timeout until the ceiling was reached.
    NetworkFailure,
    /// Upstream answered 2xx with a body that is not JSON.
    InvalidResponse,
    /// The gateway's dispatch lane is no longer running.
    Unavailable,
}

impl FailureKind {
    /// Stable machine-readable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CredentialRejected => "credential_rejected",
            Self::RateLimited => "rate_limited",
            Self::TransientUpstreamFailure => "transient_upstream_failure",
            Self::UpstreamRejected => "upstream_rejected",
            Self::NetworkFailure => "network_failure",
            Self::InvalidResponse => "invalid_response",
            Self::Unavailable => "unavailable",
        }
    }

    /// Whether a caller may reasonably try the same operation again later.
    #[must_use]
    pub const fn is_retriable(self) -> bool {
        matches!(
            self,
            Self::RateLimited
                | Self::TransientUpstreamFailure
                | Self::NetworkFailure
                | Self::Unavailable
        )
    }

    /// Suggested caller-facing HTTP status.
    ///
    /// `UpstreamRejected` passes a 4xx upstream status through; any other
    /// upstream status maps to 502.
    /// `CredentialRejected` maps to 502 so it is not mistaken for a failure
    /// of the inbound caller's own authentication.
    #[must_use]
    pub const fn http_status(self, upstream_status: Option<u16>) -> u16 {
        match self {
            Self::UpstreamRejected => match upstream_status {
                Some(status @ 400..=499) => status,
                Some(_) => 502,
                None => 400,
            },
            Self::RateLimited => 429,
            Self::NetworkFailure => 504,
            Self::Unavailable => 503,
            Self::CredentialRejected | Self::TransientUpstreamFailure | Self::InvalidResponse => {
                502
            }
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final failure of a gateway dispatch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct GatewayError {
    /// Failure category.
    pub kind: FailureKind,
    /// Upstream HTTP status of the last attempt, if a response was received.
    pub status: Option<u16>,
    /// Human-readable detail; upstream diagnostic text is kept verbatim.
    pub detail: String,
    /// Retry-After hint from the last upstream response, if any.
    pub retry_after: Option<Duration>,
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (HTTP {status}): {}", self.kind, self.detail),
            None => write!(f, "{}: {}", self.kind, self.detail),
        }
    }
}

impl GatewayError {
    /// Create an error of the given kind.
    #[must_use]
    pub fn new(kind: FailureKind, status: Option<u16>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            detail: detail.into(),
            retry_after: None,
        }
    }

    /// Attach a Retry-After hint.
    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Create a credential rejected error.
    #[must_use]
    pub fn credential_rejected(status: u16, detail: impl Into<String>) -> Self {
        Self::new(FailureKind::CredentialRejected, Some(status), detail)
    }

    /// Create a rate limited error.
    #[must_use]
    pub fn rate_limited(detail: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::new(FailureKind::RateLimited, Some(429), detail).with_retry_after(retry_after)
    }

    /// Create a transient upstream failure error.
    #[must_use]
    pub fn transient_upstream(status: u16, detail: impl Into<String>) -> Self {
        Self::new(FailureKind::TransientUpstreamFailure, Some(status), detail)
    }

    /// Create an upstream rejected error.
    #[must_use]
    pub fn upstream_rejected(status: u16, detail: impl Into<String>) -> Self {
        Self::new(FailureKind::UpstreamRejected, Some(status), detail)
    }

    /// Create a network failure error.
    #[must_use]
    pub fn network(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::NetworkFailure, None, detail)
    }

    /// Create an invalid response error.
    #[must_use]
    pub fn invalid_response(status: u16, detail: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidResponse, Some(status), detail)
    }

    /// Create an unavailable error.
    #[must_use]
    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Unavailable, None, detail)
    }

    /// Suggested caller-facing HTTP status for this error.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        self.kind.http_status(self.status)
    }
}
