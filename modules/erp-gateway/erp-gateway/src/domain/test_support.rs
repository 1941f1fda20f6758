//! Scripted transport for domain tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use super::ports::{UpstreamOutcome, UpstreamRequest, UpstreamTransport};

/// One observed attempt.
#[derive(Debug, Clone)]
pub struct SentAttempt {
    pub path: String,
    pub attempt: u32,
    pub at: Instant,
    pub idempotency_key: Option<String>,
}

/// Replays scripted outcomes per path; unscripted calls get `200 {}`.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<UpstreamOutcome>>>,
    sent: Mutex<Vec<SentAttempt>>,
    latency: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send takes `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn script(self, path: &str, outcomes: impl IntoIterator<Item = UpstreamOutcome>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(path.to_owned())
            .or_default()
            .extend(outcomes);
        self
    }

    pub fn sent(&self) -> Vec<SentAttempt> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

pub fn status(code: u16) -> UpstreamOutcome {
    UpstreamOutcome::from_response(code, Bytes::new(), None)
}

pub fn json(code: u16, body: &'static str) -> UpstreamOutcome {
    UpstreamOutcome::from_response(code, Bytes::from_static(body.as_bytes()), None)
}

#[async_trait]
impl UpstreamTransport for ScriptedTransport {
    async fn send(&self, request: &UpstreamRequest, attempt: u32) -> UpstreamOutcome {
        self.sent.lock().unwrap().push(SentAttempt {
            path: request.path.clone(),
            attempt,
            at: Instant::now(),
            idempotency_key: request.idempotency_key.clone(),
        });
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&request.path)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| json(200, "{}"))
    }
}
