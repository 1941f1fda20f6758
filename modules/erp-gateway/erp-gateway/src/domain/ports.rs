//! Output ports (interfaces) for the domain layer.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use erp_gateway_sdk::{GatewayRequest, HttpMethod};
use serde_json::Value;

/// One upstream operation, immutable once submitted and shared by every attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Trimmed, non-blank dedup key forwarded upstream when configured.
    pub idempotency_key: Option<String>,
}

impl From<GatewayRequest> for UpstreamRequest {
    fn from(request: GatewayRequest) -> Self {
        let idempotency_key = request.effective_dedup_key().map(str::to_owned);
        Self {
            method: request.method,
            path: request.path,
            query: request.query,
            body: request.body,
            idempotency_key,
        }
    }
}

/// Why an attempt produced no HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailureKind {
    /// The per-attempt deadline expired.
    Timeout,
    /// The connection could not be established.
    Connect,
    /// Anything else (broken stream, oversized body, malformed request).
    Other,
}

impl TransportFailureKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Other => "transport",
        }
    }
}

impl fmt::Display for TransportFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single upstream attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamOutcome {
    /// 2xx response.
    Success { status: u16, body: Bytes },
    /// Any non-2xx response.
    Rejected {
        status: u16,
        body: Bytes,
        retry_after: Option<Duration>,
    },
    /// No response was received.
    TransportFailure {
        kind: TransportFailureKind,
        reason: String,
    },
}

impl UpstreamOutcome {
    /// Sort a received response into `Success` or `Rejected` by status.
    #[must_use]
    pub fn from_response(status: u16, body: Bytes, retry_after: Option<Duration>) -> Self {
        if (200..300).contains(&status) {
            Self::Success { status, body }
        } else {
            Self::Rejected {
                status,
                body,
                retry_after,
            }
        }
    }

    #[must_use]
    pub fn transport(kind: TransportFailureKind, reason: impl Into<String>) -> Self {
        Self::TransportFailure {
            kind,
            reason: reason.into(),
        }
    }

    /// HTTP status, if a response was received.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Success { status, .. } | Self::Rejected { status, .. } => Some(*status),
            Self::TransportFailure { .. } => None,
        }
    }
}

/// Port performing one wire-level round trip to the upstream ERP.
///
/// Implementations never retry and never enforce the attempt deadline; both
/// belong to the caller.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    /// Send `request`. `attempt` is 1-based.
    async fn send(&self, request: &UpstreamRequest, attempt: u32) -> UpstreamOutcome;
}
