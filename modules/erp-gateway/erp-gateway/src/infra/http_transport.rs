//! hyper-based [`UpstreamTransport`].
//!
//! One pooled HTTP/1.1 client with rustls (webpki roots). Each call is a single
//! round trip; retries and deadlines are the caller's job.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use erp_gateway_sdk::HttpMethod;
use http::header::{ACCEPT, CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use thiserror::Error;

use crate::config::{ConfigError, ErpGatewayConfig};
use crate::credential::Credential;
use crate::domain::ports::{TransportFailureKind, UpstreamOutcome, UpstreamRequest, UpstreamTransport};

/// Header carrying the retry number on retried attempts
pub const RETRY_ATTEMPT_HEADER: &str = "X-Retry-Attempt";

const APPLICATION_JSON: &str = "application/json";
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Errors building the transport.
#[derive(Debug, Error)]
pub enum TransportBuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("TLS initialization failed: {0}")]
    Tls(#[source] rustls::Error),

    #[error("{0} is not a valid header value")]
    InvalidHeaderValue(&'static str),
}

/// Upstream transport over hyper.
pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    base_url: String,
    auth_header: HeaderName,
    auth_scheme: String,
    credential: Credential,
    user_agent: HeaderValue,
    idempotency_header: Option<HeaderName>,
    max_body_bytes: usize,
}

impl HyperTransport {
    /// Build the transport for `config.base_url`.
    ///
    /// # Errors
    /// Returns [`TransportBuildError`] if the configuration does not validate,
    /// a header value is malformed, or TLS cannot be initialized.
    pub fn new(config: &ErpGatewayConfig) -> Result<Self, TransportBuildError> {
        config.validate()?;

        let auth_header = header_name(&config.auth_header, "auth_header")?;
        let idempotency_header = config
            .idempotency_header
            .as_deref()
            .map(|name| header_name(name, "idempotency_header"))
            .transpose()?;
        let user_agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|_| TransportBuildError::InvalidHeaderValue("user_agent"))?;
        HeaderValue::from_str(&config.api_token.header_value(&config.auth_scheme))
            .map_err(|_| TransportBuildError::InvalidHeaderValue("api_token"))?;

        let builder = hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(crypto_provider())
            .map_err(TransportBuildError::Tls)?;
        let connector = if config.allow_insecure_http {
            tracing::warn!(
                base_url = %config.base_url,
                "insecure HTTP allowed for upstream ERP; credential may travel in clear text"
            );
            builder.https_or_http().enable_http1().build()
        } else {
            builder.https_only().enable_http1().build()
        };

        // pool_idle_timeout needs a timer to take effect
        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build(connector);

        Ok(Self {
            client,
            base_url: config.base_url.trim().trim_end_matches('/').to_owned(),
            auth_header,
            auth_scheme: config.auth_scheme.clone(),
            credential: config.api_token.clone(),
            user_agent,
            idempotency_header,
            max_body_bytes: config.max_response_body_bytes,
        })
    }

    fn build_request(
        &self,
        request: &UpstreamRequest,
        attempt: u32,
    ) -> Result<Request<Full<Bytes>>, String> {
        let uri: Uri = upstream_url(&self.base_url, &request.path, &request.query)?
            .parse()
            .map_err(|e| format!("invalid upstream url: {e}"))?;

        let body = match &request.body {
            Some(value) => Bytes::from(
                serde_json::to_vec(value).map_err(|e| format!("unencodable body: {e}"))?,
            ),
            None => Bytes::new(),
        };

        let mut http_request = Request::new(Full::new(body));
        *http_request.method_mut() = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };
        *http_request.uri_mut() = uri;

        let headers = http_request.headers_mut();
        headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));
        headers.insert(USER_AGENT, self.user_agent.clone());
        if request.body.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        }
        if attempt > 1 {
            headers.insert(
                HeaderName::from_static("x-retry-attempt"),
                HeaderValue::from(attempt - 1),
            );
        }
        if let (Some(name), Some(key)) = (&self.idempotency_header, &request.idempotency_key) {
            match HeaderValue::from_str(key) {
                Ok(value) => {
                    headers.insert(name.clone(), value);
                }
                Err(_) => tracing::debug!("dedup key is not a valid header value; not forwarded"),
            }
        }

        let raw = self.credential.header_value(&self.auth_scheme);
        let mut auth = HeaderValue::from_str(&raw)
            .map_err(|_| "credential is not a valid header value".to_owned())?;
        auth.set_sensitive(true);
        headers.insert(self.auth_header.clone(), auth);

        Ok(http_request)
    }
}

#[async_trait]
impl UpstreamTransport for HyperTransport {
    async fn send(&self, request: &UpstreamRequest, attempt: u32) -> UpstreamOutcome {
        let http_request = match self.build_request(request, attempt) {
            Ok(r) => r,
            Err(reason) => return UpstreamOutcome::transport(TransportFailureKind::Other, reason),
        };

        let response = match self.client.request(http_request).await {
            Ok(r) => r,
            Err(e) => {
                let kind = if e.is_connect() {
                    TransportFailureKind::Connect
                } else {
                    TransportFailureKind::Other
                };
                return UpstreamOutcome::transport(kind, error_chain(&e));
            }
        };

        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        match read_body_limited(response.into_body(), self.max_body_bytes).await {
            Ok(body) => UpstreamOutcome::from_response(status, body, retry_after),
            Err(reason) => UpstreamOutcome::transport(TransportFailureKind::Other, reason),
        }
    }
}

fn header_name(name: &str, field: &'static str) -> Result<HeaderName, TransportBuildError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| TransportBuildError::InvalidHeaderValue(field))
}

fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Join `path` onto `base` with exactly one `/`, and append the URL-encoded
/// query.
fn upstream_url(base: &str, path: &str, query: &[(String, String)]) -> Result<String, String> {
    let mut url = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim().trim_start_matches('/')
    );
    if !query.is_empty() {
        let encoded =
            serde_urlencoded::to_string(query).map_err(|e| format!("unencodable query: {e}"))?;
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(&encoded);
    }
    Ok(url)
}

/// Parse `Retry-After` as integer seconds or an HTTP-date.
///
/// A date in the past yields `None`.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<i64>() {
        return u64::try_from(seconds).ok().map(Duration::from_secs);
    }

    let at = httpdate::parse_http_date(value).ok()?;
    at.duration_since(SystemTime::now()).ok()
}

async fn read_body_limited(body: Incoming, limit: usize) -> Result<Bytes, String> {
    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| format!("failed to read response body: {e}"))?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len().saturating_add(chunk.len()) > limit {
                return Err(format!("response body exceeds {limit} bytes"));
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}

fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
