//! Local client adapter implementing the SDK API trait.

use std::sync::Arc;

use async_trait::async_trait;
use erp_gateway_sdk::{ErpGatewayApi, GatewayError, GatewayRequest, GatewayResponse};

use crate::domain::service::Service;

/// Bridges the domain [`Service`] to [`ErpGatewayApi`].
pub struct ErpGatewayLocalClient {
    service: Arc<Service>,
}

impl ErpGatewayLocalClient {
    #[must_use]
    pub fn new(service: Arc<Service>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl ErpGatewayApi for ErpGatewayLocalClient {
    async fn dispatch(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        self.service.dispatch(request).await.map_err(Into::into)
    }
}
