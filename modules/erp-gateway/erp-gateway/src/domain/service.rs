//! Domain service for the ERP gateway.
//!
//! Composes the idempotency cache around the upstream caller. Requests are
//! forwarded as given; payloads are not validated here.

use std::sync::Arc;

use erp_gateway_sdk::{GatewayRequest, GatewayResponse};
use tracing::instrument;

use super::backoff::RetryPolicy;
use super::caller::{CallSuccess, UpstreamCaller};
use super::dispatch_queue::DispatchQueue;
use super::error::DomainError;
use super::idempotency::IdempotencyCache;
use super::ports::{UpstreamRequest, UpstreamTransport};
use crate::config::ErpGatewayConfig;
use crate::credential::Credential;
use crate::infra::http_transport::{HyperTransport, TransportBuildError};

/// Domain service for gateway dispatches.
pub struct Service {
    caller: Arc<UpstreamCaller>,
    dedup: IdempotencyCache<CallSuccess, DomainError>,
    credential: Credential,
}

impl Service {
    /// Create a service over an explicit transport.
    ///
    /// Spawns the dispatch worker, so this must run inside a tokio runtime.
    #[must_use]
    pub fn new(config: &ErpGatewayConfig, transport: Arc<dyn UpstreamTransport>) -> Self {
        let queue = DispatchQueue::spawn(config.dispatch_interval);
        let caller = UpstreamCaller::new(
            queue,
            transport,
            RetryPolicy::from(&config.retry),
            config.request_timeout,
        );
        Self {
            caller: Arc::new(caller),
            dedup: IdempotencyCache::new(config.dedup.ttl, config.dedup.max_entries),
            credential: config.api_token.clone(),
        }
    }

    /// Create a service talking to `config.base_url` over HTTPS.
    ///
    /// # Errors
    /// Returns [`TransportBuildError`] if the configuration is invalid or the
    /// TLS connector cannot be built.
    pub fn from_config(config: &ErpGatewayConfig) -> Result<Self, TransportBuildError> {
        let transport = HyperTransport::new(config)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    /// Forward one operation, collapsing calls that share a dedup key.
    ///
    /// # Errors
    /// Returns the terminal [`DomainError`], with the configured credential
    /// scrubbed from any free text.
    #[instrument(
        name = "erp_gateway.dispatch",
        skip_all,
        fields(
            method = %request.method,
            path = %request.path,
            dedup = request.effective_dedup_key().is_some()
        )
    )]
    pub async fn dispatch(&self, request: GatewayRequest) -> Result<GatewayResponse, DomainError> {
        let upstream = Arc::new(UpstreamRequest::from(request));
        let key = upstream.idempotency_key.clone();
        let caller = Arc::clone(&self.caller);

        let lookup = self
            .dedup
            .get_or_compute(key.as_deref(), async move { caller.call(upstream).await })
            .await
            .map_err(|e| e.as_ref().clone().scrubbed(&self.credential))?;

        if lookup.replayed {
            tracing::debug!("served deduplicated result");
        }
        let CallSuccess {
            status,
            body,
            attempts,
        } = lookup.value;
        Ok(GatewayResponse {
            status,
            body,
            attempts,
            deduplicated: lookup.replayed,
        })
    }

    /// Submissions waiting for a dispatch slot.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.caller.queue().pending()
    }

    /// Number of remembered dedup results.
    pub async fn dedup_len(&self) -> u64 {
        self.dedup.len().await
    }

    /// Forget the remembered result for `key`.
    pub async fn forget(&self, key: &str) {
        self.dedup.invalidate(key).await;
    }
}
