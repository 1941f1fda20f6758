//! ERP gateway API trait.

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::models::{GatewayRequest, GatewayResponse};

/// Public API of the ERP gateway.
///
/// Implementations serialize every upstream call through a single
/// rate-limited lane, resolve retries internally and collapse calls that share
/// a deduplication key. Callers only ever observe the final outcome.
#[async_trait]
pub trait ErpGatewayApi: Send + Sync {
    /// Forward one operation to the upstream ERP.
    ///
    /// # Errors
    /// Returns [`GatewayError`] carrying the [`FailureKind`](crate::FailureKind),
    /// the upstream status (if any) and the upstream diagnostic text.
    async fn dispatch(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError>;
}
