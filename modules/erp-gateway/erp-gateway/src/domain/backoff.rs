//! Retry policy: attempt ceiling and exponential backoff.

use std::time::Duration;

use erp_gateway_sdk::FailureKind;

use super::classifier::classify;
use super::ports::UpstreamOutcome;
use crate::config::RetrySettings;

/// What the caller does after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The attempt succeeded.
    Complete,
    /// Sleep, then submit a fresh attempt.
    RetryAfter(Duration),
    /// Stop with this failure.
    Fail(FailureKind),
}

/// Attempt ceiling and backoff curve.
///
/// Decisions depend only on the outcome and the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
    max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self::new(
            settings.max_attempts,
            settings.base_backoff,
            settings.max_backoff,
        )
    }
}

impl RetryPolicy {
    /// `max_attempts` counts the first attempt; values below 1 are raised to 1.
    #[must_use]
    pub fn new(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
            max,
        }
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt - 1)`,
    /// capped at `max`. Saturates instead of overflowing.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        1u32.checked_shl(exponent)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Decide the next step after attempt `attempt` (1-based) produced `outcome`.
    #[must_use]
    pub fn decide(&self, outcome: &UpstreamOutcome, attempt: u32) -> RetryDecision {
        let classification = classify(outcome);
        match classification.terminal_kind() {
            None => RetryDecision::Complete,
            Some(_) if classification.is_retryable() && attempt < self.max_attempts => {
                RetryDecision::RetryAfter(self.delay_after(attempt))
            }
            Some(kind) => RetryDecision::Fail(kind),
        }
    }
}
