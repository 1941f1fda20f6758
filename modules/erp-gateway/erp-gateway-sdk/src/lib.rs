//! ERP Gateway SDK
//!
//! This crate provides the public contract of the `erp-gateway` module:
//!
//! - [`ErpGatewayApi`] - API trait used by the inbound route layer
//! - [`GatewayRequest`], [`GatewayResponse`], [`HttpMethod`] - Models
//! - [`GatewayError`], [`FailureKind`] - Typed failures
//!
//! ## Usage
//!
//! ```ignore
//! use erp_gateway_sdk::{ErpGatewayApi, GatewayRequest};
//!
//! let request = GatewayRequest::post("/orders", serde_json::json!({"sku": "A-1"}))
//!     .with_dedup_key("order-7731");
//!
//! match gateway.dispatch(request).await {
//!     Ok(resp) => respond(resp.status, resp.body),
//!     Err(err) => respond(err.kind.http_status(err.status), err.detail),
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod api;
pub mod error;
pub mod models;

pub use api::ErpGatewayApi;
pub use error::{FailureKind, GatewayError};
pub use models::{GatewayRequest, GatewayResponse, HttpMethod};
