//! Domain errors for the ERP gateway.

use std::time::Duration;

use bytes::Bytes;
use erp_gateway_sdk::{FailureKind, GatewayError};
use thiserror::Error;

use super::dispatch_queue::DispatchError;
use super::idempotency::ComputationLost;
use super::ports::{TransportFailureKind, UpstreamOutcome};
use crate::credential::Credential;

/// Domain-level errors for gateway dispatches.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Upstream answered with a status that ends the dispatch.
    #[error("{kind} (HTTP {status})")]
    Upstream {
        kind: FailureKind,
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },

    /// No response after the last attempt.
    #[error("network failure ({kind}): {reason}")]
    Network {
        kind: TransportFailureKind,
        reason: String,
    },

    /// 2xx with a body that is not JSON.
    #[error("invalid upstream response (HTTP {status}): {reason}")]
    InvalidResponse { status: u16, reason: String },

    /// The dispatch lane rejected the attempt.
    #[error("dispatch unavailable: {0}")]
    Unavailable(#[from] DispatchError),
}

impl DomainError {
    /// Build the terminal error for `outcome` once the policy has given up.
    #[must_use]
    pub fn from_outcome(kind: FailureKind, outcome: UpstreamOutcome) -> Self {
        match outcome {
            UpstreamOutcome::TransportFailure { kind, reason } => Self::Network { kind, reason },
            UpstreamOutcome::Success { status, body } => Self::Upstream {
                kind,
                status,
                body: body_text(&body),
                retry_after: None,
            },
            UpstreamOutcome::Rejected {
                status,
                body,
                retry_after,
            } => Self::Upstream {
                kind,
                status,
                body: body_text(&body),
                retry_after,
            },
        }
    }

    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Upstream { kind, .. } => *kind,
            Self::Network { .. } => FailureKind::NetworkFailure,
            Self::InvalidResponse { .. } => FailureKind::InvalidResponse,
            Self::Unavailable(_) => FailureKind::Unavailable,
        }
    }

    /// Replace any occurrence of `credential` in free-text fields.
    #[must_use]
    pub fn scrubbed(self, credential: &Credential) -> Self {
        match self {
            Self::Upstream {
                kind,
                status,
                body,
                retry_after,
            } => Self::Upstream {
                kind,
                status,
                body: credential.scrub(&body),
                retry_after,
            },
            Self::Network { kind, reason } => Self::Network {
                kind,
                reason: credential.scrub(&reason),
            },
            Self::InvalidResponse { status, reason } => Self::InvalidResponse {
                status,
                reason: credential.scrub(&reason),
            },
            Self::Unavailable(e) => Self::Unavailable(e),
        }
    }
}

impl From<ComputationLost> for DomainError {
    fn from(_: ComputationLost) -> Self {
        Self::Unavailable(DispatchError::Aborted)
    }
}

/// Upstream body as text, lossy UTF-8.
fn body_text(body: &Bytes) -> String {
    String::from_utf8_lossy(body).into_owned()
}

/// Convert `DomainError` to SDK `GatewayError`.
impl From<DomainError> for GatewayError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Upstream {
                kind,
                status,
                body,
                retry_after,
            } => Self::new(kind, Some(status), body).with_retry_after(retry_after),
            DomainError::Network { kind, reason } => Self::network(format!("{kind}: {reason}")),
            DomainError::InvalidResponse { status, reason } => {
                Self::invalid_response(status, reason)
            }
            DomainError::Unavailable(e) => Self::unavailable(e.to_string()),
        }
    }
}
