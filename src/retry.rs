//! Rate-limit and retry policy.
//!
//! DESIGN
//! ======
//! `RetryPolicy::decide` is a pure function from (attempt, error) to a
//! decision, so the backoff curve is testable without timers. The async
//! driver `submit_with_retry` wraps it around a `Transport`, bounding each
//! attempt with a timeout and adding up to 10% random jitter to sleeps.
//!
//! Only transient failures (429, 5xx, connect errors, timeouts) are
//! retried. 401/403/409 and validation failures return immediately.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::SyncError;
use crate::session::Credential;
use crate::transport::{MutationRequest, ServerAck, Transport};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: DEFAULT_MAX_RETRIES, base_delay: DEFAULT_BASE_DELAY, max_delay: DEFAULT_MAX_DELAY }
    }
}

impl RetryPolicy {
    /// Decide what to do after failed attempt number `attempt` (1-based).
    ///
    /// Backoff is `base_delay * 2^(attempt-1)` capped at `max_delay`. A
    /// server `Retry-After` replaces the computed delay, still capped.
    #[must_use]
    pub fn decide(&self, attempt: u32, error: &SyncError) -> RetryDecision {
        if attempt == 0 || attempt > self.max_retries || !error.kind().is_transient() {
            return RetryDecision::GiveUp;
        }
        let delay = match error {
            SyncError::RateLimited { retry_after: Some(after) } => *after,
            _ => self.backoff(attempt),
        };
        RetryDecision::Retry { delay: delay.min(self.max_delay) }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Add up to 10% random jitter so clients throttled together don't retry together.
#[must_use]
pub fn with_jitter(delay: Duration) -> Duration {
    let max_jitter = u64::try_from(delay.as_millis() / 10).unwrap_or(0);
    if max_jitter == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::rng().random_range(0..=max_jitter))
}

/// Submit `request`, retrying transient failures per `policy`.
///
/// `on_retry(attempt, delay)` fires before each backoff sleep.
///
/// # Errors
///
/// Returns the last error once retries are exhausted, or the first
/// non-transient error.
pub async fn submit_with_retry<T, F>(
    transport: &T,
    request: &MutationRequest,
    credential: &Credential,
    policy: RetryPolicy,
    timeout: Duration,
    mut on_retry: F,
) -> Result<ServerAck, SyncError>
where
    T: Transport + ?Sized,
    F: FnMut(u32, Duration),
{
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(timeout, transport.submit(request, credential)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::NetworkFailure(format!("request timed out after {}ms", timeout.as_millis()))),
        };
        let err = match result {
            Ok(ack) => return Ok(ack),
            Err(err) => err,
        };
        attempt += 1;
        match policy.decide(attempt, &err) {
            RetryDecision::Retry { delay } => {
                let delay = with_jitter(delay);
                warn!(op_id = %request.op_id, attempt, delay_ms = delay.as_millis(), error = %err, "mutation failed; retrying");
                on_retry(attempt, delay);
                tokio::time::sleep(delay).await;
            }
            RetryDecision::GiveUp => return Err(err),
        }
    }
}

#[cfg(test)]
#[path = "retry_test.rs"]
mod tests;
