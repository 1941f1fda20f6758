//! Upstream caller: drives the attempts of one dispatch.
//!
//! ```text
//! Attempting(1) -> Backoff(1, d) -> Attempting(2) -> ... -> Terminal
//! ```
//!
//! Every attempt is a fresh submission to the dispatch queue. Backoff sleeps
//! happen outside the queue, so other callers are admitted meanwhile.

use std::sync::Arc;
use std::time::Duration;

use erp_gateway_sdk::FailureKind;
use serde_json::Value;
use tracing::instrument;

use super::backoff::{RetryDecision, RetryPolicy};
use super::classifier::classify;
use super::dispatch_queue::{DispatchError, DispatchQueue};
use super::error::DomainError;
use super::ports::{TransportFailureKind, UpstreamOutcome, UpstreamRequest, UpstreamTransport};

/// Decoded result of a successful dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSuccess {
    pub status: u16,
    pub body: Value,
    pub attempts: u32,
}

#[derive(Debug)]
enum CallState {
    Attempting { attempt: u32 },
    Backoff { attempt: u32, delay: Duration },
    Terminal(Result<CallSuccess, DomainError>),
}

/// Runs one request through the dispatch queue until it completes or the
/// retry policy gives up.
pub struct UpstreamCaller {
    queue: DispatchQueue,
    transport: Arc<dyn UpstreamTransport>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl UpstreamCaller {
    #[must_use]
    pub fn new(
        queue: DispatchQueue,
        transport: Arc<dyn UpstreamTransport>,
        policy: RetryPolicy,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            transport,
            policy,
            attempt_timeout,
        }
    }

    #[must_use]
    pub const fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    /// Dispatch `request`, retrying per the policy.
    ///
    /// # Errors
    /// Returns the terminal [`DomainError`] once no further attempt is made.
    #[instrument(
        name = "erp_gateway.call",
        skip_all,
        fields(method = %request.method, path = %request.path)
    )]
    pub async fn call(&self, request: Arc<UpstreamRequest>) -> Result<CallSuccess, DomainError> {
        let mut state = CallState::Attempting { attempt: 1 };
        loop {
            state = match state {
                CallState::Attempting { attempt } => self.step(&request, attempt).await,
                CallState::Backoff { attempt, delay } => {
                    tokio::time::sleep(delay).await;
                    CallState::Attempting {
                        attempt: attempt.saturating_add(1),
                    }
                }
                CallState::Terminal(result) => return result,
            };
        }
    }

    async fn step(&self, request: &Arc<UpstreamRequest>, attempt: u32) -> CallState {
        let outcome = match self.attempt(request, attempt).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(attempt, error = %e, "dispatch lane unavailable");
                return CallState::Terminal(Err(e.into()));
            }
        };
        let status = outcome.status();

        match self.policy.decide(&outcome, attempt) {
            RetryDecision::Complete => CallState::Terminal(decode_success(outcome, attempt)),
            RetryDecision::RetryAfter(delay) => {
                tracing::debug!(
                    attempt,
                    status,
                    classification = classify(&outcome).as_str(),
                    backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    method = %request.method,
                    path = %request.path,
                    "retrying upstream call"
                );
                CallState::Backoff { attempt, delay }
            }
            RetryDecision::Fail(kind) => {
                if kind == FailureKind::CredentialRejected {
                    tracing::warn!(
                        attempt,
                        status,
                        "upstream rejected the configured credential"
                    );
                } else if classify(&outcome).is_retryable() {
                    tracing::warn!(attempt, status, kind = %kind, "upstream retries exhausted");
                } else {
                    tracing::debug!(attempt, status, kind = %kind, "upstream call failed");
                }
                CallState::Terminal(Err(DomainError::from_outcome(kind, outcome)))
            }
        }
    }

    async fn attempt(
        &self,
        request: &Arc<UpstreamRequest>,
        attempt: u32,
    ) -> Result<UpstreamOutcome, DispatchError> {
        let transport = Arc::clone(&self.transport);
        let request = Arc::clone(request);
        let timeout = self.attempt_timeout;

        self.queue
            .submit(async move {
                tracing::debug!(attempt, "sending upstream request");
                match tokio::time::timeout(timeout, transport.send(&request, attempt)).await {
                    Ok(outcome) => outcome,
                    Err(_) => UpstreamOutcome::transport(
                        TransportFailureKind::Timeout,
                        format!(
                            "no response within {}",
                            humantime::format_duration(timeout)
                        ),
                    ),
                }
            })
            .await
    }
}

fn decode_success(outcome: UpstreamOutcome, attempts: u32) -> Result<CallSuccess, DomainError> {
    match outcome {
        UpstreamOutcome::Success { status, body } => {
            let body = if body.iter().all(u8::is_ascii_whitespace) {
                Value::Null
            } else {
                serde_json::from_slice(&body).map_err(|e| DomainError::InvalidResponse {
                    status,
                    reason: e.to_string(),
                })?
            };
            Ok(CallSuccess {
                status,
                body,
                attempts,
            })
        }
        other => Err(DomainError::from_outcome(FailureKind::UpstreamRejected, other)),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::domain::test_support::{ScriptedTransport, json, status};
    use bytes::Bytes;
    use erp_gateway_sdk::GatewayRequest;
    use serde_json::json;
    use tokio::time::Instant;

    fn caller(transport: &Arc<ScriptedTransport>, interval: Duration) -> UpstreamCaller {
        UpstreamCaller::new(
            DispatchQueue::spawn(interval),
            Arc::clone(transport) as Arc<dyn UpstreamTransport>,
            RetryPolicy::default(),
            Duration::from_secs(30),
        )
    }

    fn request(path: &str) -> Arc<UpstreamRequest> {
        Arc::new(GatewayRequest::get(path).into())
    }

    #[tokio::test(start_paused = true)]
    async fn two_server_errors_then_success() {
        let transport = Arc::new(ScriptedTransport::new().script(
            "/items",
            [status(500), status(500), json(200, r#"{"ok":true}"#)],
        ));
        let caller = caller(&transport, Duration::from_millis(1));
        let start = Instant::now();

        let out = caller.call(request("/items")).await.unwrap();

        assert_eq!(out.attempts, 3);
        assert_eq!(out.status, 200);
        assert_eq!(out.body, json!({"ok": true}));
        assert_eq!(transport.sent_count(), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1500), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1600), "{elapsed:?}");

        let attempts: Vec<u32> = transport.sent().iter().map(|s| s.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn credential_rejection_is_not_retried() {
        let transport =
            Arc::new(ScriptedTransport::new().script("/items", [json(401, "bad token")]));
        let caller = caller(&transport, Duration::from_millis(1));

        let err = caller.call(request("/items")).await.unwrap_err();

        assert_eq!(transport.sent_count(), 1);
        assert_eq!(err.kind(), FailureKind::CredentialRejected);
        let DomainError::Upstream { status, body, .. } = err else {
            panic!("expected upstream error, got {err:?}");
        };
        assert_eq!(status, 401);
        assert_eq!(body, "bad token");
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_exhausts_with_last_retry_after() {
        let limited = |secs| {
            UpstreamOutcome::from_response(
                429,
                Bytes::from_static(b"slow down"),
                Some(Duration::from_secs(secs)),
            )
        };
        let transport = Arc::new(
            ScriptedTransport::new().script("/items", [limited(1), limited(2), limited(3)]),
        );
        let caller = caller(&transport, Duration::from_millis(1));

        let err = caller.call(request("/items")).await.unwrap_err();

        assert_eq!(transport.sent_count(), 3);
        assert_eq!(
            err,
            DomainError::Upstream {
                kind: FailureKind::RateLimited,
                status: 429,
                body: "slow down".to_owned(),
                retry_after: Some(Duration::from_secs(3)),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn bad_request_is_not_retried() {
        let transport = Arc::new(
            ScriptedTransport::new().script("/orders", [json(400, r#"{"error":"qty"}"#)]),
        );
        let caller = caller(&transport, Duration::from_millis(1));

        let err = caller.call(request("/orders")).await.unwrap_err();

        assert_eq!(transport.sent_count(), 1);
        assert_eq!(err.kind(), FailureKind::UpstreamRejected);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_exhaust_to_network_failure() {
        let failure = || UpstreamOutcome::transport(TransportFailureKind::Connect, "refused");
        let transport = Arc::new(
            ScriptedTransport::new().script("/items", [failure(), failure(), failure()]),
        );
        let caller = caller(&transport, Duration::from_millis(1));

        let err = caller.call(request("/items")).await.unwrap_err();

        assert_eq!(transport.sent_count(), 3);
        assert_eq!(err.kind(), FailureKind::NetworkFailure);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_upstream_times_out_per_attempt() {
        let transport =
            Arc::new(ScriptedTransport::new().with_latency(Duration::from_secs(60)));
        let caller = UpstreamCaller::new(
            DispatchQueue::spawn(Duration::from_millis(1)),
            Arc::clone(&transport) as Arc<dyn UpstreamTransport>,
            RetryPolicy::new(2, Duration::from_millis(10), Duration::from_secs(1)),
            Duration::from_secs(5),
        );
        let start = Instant::now();

        let err = caller.call(request("/items")).await.unwrap_err();

        assert!(matches!(
            err,
            DomainError::Network {
                kind: TransportFailureKind::Timeout,
                ..
            }
        ));
        assert_eq!(transport.sent_count(), 2);
        assert!(start.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_body_decodes_to_null_and_garbage_is_invalid() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .script("/empty", [status(204)])
                .script("/garbage", [json(200, "<html>")]),
        );
        let caller = caller(&transport, Duration::from_millis(1));

        let out = caller.call(request("/empty")).await.unwrap();
        assert_eq!(out.body, Value::Null);

        let err = caller.call(request("/garbage")).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidResponse { status: 200, .. }));
        // Not retried.
        assert_eq!(transport.sent_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_does_not_hold_the_queue_slot() {
        let interval = Duration::from_millis(100);
        let transport =
            Arc::new(ScriptedTransport::new().script("/a", [status(503), json(200, "{}")]));
        let caller = Arc::new(caller(&transport, interval));
        let start = Instant::now();

        let first = {
            let caller = Arc::clone(&caller);
            tokio::spawn(async move { caller.call(request("/a")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = {
            let caller = Arc::clone(&caller);
            tokio::spawn(async move { caller.call(request("/b")).await })
        };

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let sent = transport.sent();
        let b = sent.iter().find(|s| s.path == "/b").unwrap();
        let a_retry = sent
            .iter()
            .find(|s| s.path == "/a" && s.attempt == 2)
            .unwrap();
        // `/b` goes out while `/a` sleeps its 500ms backoff.
        assert!(b.at.duration_since(start) < Duration::from_millis(500));
        assert!(b.at < a_retry.at);
    }

    struct PanickingTransport;

    #[async_trait::async_trait]
    impl UpstreamTransport for PanickingTransport {
        async fn send(&self, _request: &UpstreamRequest, _attempt: u32) -> UpstreamOutcome {
            panic!("transport bug");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_attempt_yields_unavailable() {
        let caller = UpstreamCaller::new(
            DispatchQueue::spawn(Duration::from_millis(1)),
            Arc::new(PanickingTransport),
            RetryPolicy::default(),
            Duration::from_secs(30),
        );

        let err = caller.call(request("/x")).await.unwrap_err();

        assert_eq!(err, DomainError::Unavailable(DispatchError::Aborted));
        assert_eq!(err.kind(), FailureKind::Unavailable);
    }

    #[derive(Clone, Default)]
    struct EventCapture {
        events: Arc<std::sync::Mutex<Vec<(tracing::Level, String)>>>,
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventCapture {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut visitor = MessageVisitor(String::new());
            event.record(&mut visitor);
            self.events
                .lock()
                .unwrap()
                .push((*event.metadata().level(), visitor.0));
        }
    }

    struct MessageVisitor(String);

    impl tracing::field::Visit for MessageVisitor {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{value:?}");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn logs_retries_and_exhaustion() {
        use tracing_subscriber::layer::SubscriberExt;

        let capture = EventCapture::default();
        let events = Arc::clone(&capture.events);
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(capture));

        let transport = Arc::new(
            ScriptedTransport::new().script("/items", [status(500), status(500), status(500)]),
        );
        let caller = caller(&transport, Duration::from_millis(1));
        caller.call(request("/items")).await.unwrap_err();

        let events = events.lock().unwrap();
        let retries = events
            .iter()
            .filter(|(level, msg)| *level == tracing::Level::DEBUG && msg == "retrying upstream call")
            .count();
        assert_eq!(retries, 2);
        assert!(
            events
                .iter()
                .any(|(level, msg)| *level == tracing::Level::WARN
                    && msg == "upstream retries exhausted"),
            "{events:?}"
        );
    }
}
