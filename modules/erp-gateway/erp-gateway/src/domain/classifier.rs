//! Classification of a single upstream attempt.

use erp_gateway_sdk::FailureKind;

use super::ports::UpstreamOutcome;

/// What an attempt's outcome means for the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// 2xx.
    Success,
    /// 401/403: the configured credential is refused. Never retried.
    FatalClientError,
    /// 429.
    RateLimited,
    /// 5xx, or no response at all.
    TransientUpstreamError { transport: bool },
    /// Any other status. Never retried.
    FatalUpstreamError,
}

impl Classification {
    /// Shorthand used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::FatalClientError => "fatal_client",
            Self::RateLimited => "rate_limited",
            Self::TransientUpstreamError { .. } => "transient",
            Self::FatalUpstreamError => "fatal_upstream",
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::TransientUpstreamError { .. })
    }

    /// Failure surfaced once no further attempt will be made.
    ///
    /// Returns `None` for `Success`.
    #[must_use]
    pub const fn terminal_kind(self) -> Option<FailureKind> {
        match self {
            Self::Success => None,
            Self::FatalClientError => Some(FailureKind::CredentialRejected),
            Self::RateLimited => Some(FailureKind::RateLimited),
            Self::TransientUpstreamError { transport: true } => Some(FailureKind::NetworkFailure),
            Self::TransientUpstreamError { transport: false } => {
                Some(FailureKind::TransientUpstreamFailure)
            }
            Self::FatalUpstreamError => Some(FailureKind::UpstreamRejected),
        }
    }
}

/// Classify an HTTP status code.
#[must_use]
pub const fn classify_status(status: u16) -> Classification {
    match status {
        200..=299 => Classification::Success,
        401 | 403 => Classification::FatalClientError,
        429 => Classification::RateLimited,
        500.. => Classification::TransientUpstreamError { transport: false },
        _ => Classification::FatalUpstreamError,
    }
}

/// Classify one attempt's outcome.
#[must_use]
pub const fn classify(outcome: &UpstreamOutcome) -> Classification {
    match outcome {
        UpstreamOutcome::Success { .. } => Classification::Success,
        UpstreamOutcome::Rejected { status, .. } => classify_status(*status),
        UpstreamOutcome::TransportFailure { .. } => {
            Classification::TransientUpstreamError { transport: true }
        }
    }
}
