//! ERP Gateway Module Implementation
//!
//! Outbound gateway to a single upstream ERP. Every upstream call goes through
//! one rate-limited dispatch lane, retries are resolved internally, and calls
//! carrying the same dedup key are answered once.
//!
//! ## Architecture
//!
//! ```text
//! ErpGatewayApi::dispatch
//!        │
//!        ▼
//! IdempotencyCache ── hit ──▶ stored result
//!        │ miss
//!        ▼
//! UpstreamCaller ◀── backoff ──┐
//!        │                     │ retryable
//!        ▼                     │
//! DispatchQueue ──▶ UpstreamTransport (hyper) ──▶ classify
//! ```
//!
//! The public API is defined in `erp-gateway-sdk` and re-exported here.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

// === PUBLIC API (from SDK) ===
pub use erp_gateway_sdk::{
    ErpGatewayApi, FailureKind, GatewayError, GatewayRequest, GatewayResponse, HttpMethod,
};

// === CONFIGURATION ===
pub mod config;
pub mod credential;
pub use config::{ConfigError, DedupSettings, ErpGatewayConfig, RetrySettings};
pub use credential::Credential;

// === LOCAL CLIENT ===
pub mod local_client;
pub use local_client::ErpGatewayLocalClient;

pub use domain::service::Service;

// === INTERNAL MODULES ===
#[doc(hidden)]
pub mod domain;
#[doc(hidden)]
pub mod infra;
