//! Bounded exponential backoff for rate-limited upstream calls.

use std::future::Future;
use std::time::Duration;

/// HTTP status that triggers a retry. Every other status is final.
pub const RATE_LIMITED: u16 = 429;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based): base * 2^attempt, capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Anything carrying an HTTP status code.
pub trait StatusCarrier {
    fn status_code(&self) -> u16;
}

impl StatusCarrier for reqwest::Response {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }
}

/// Run `send` until it returns a non-429 response or the retries run out.
/// Transport errors are returned immediately; the last 429 is returned as is.
pub async fn send_with_retry<R, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut send: F,
) -> std::result::Result<R, E>
where
    R: StatusCarrier,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<R, E>>,
{
    let mut attempt = 0;
    loop {
        let response = send().await?;
        if response.status_code() != RATE_LIMITED || attempt >= policy.max_retries {
            if response.status_code() == RATE_LIMITED {
                tracing::warn!(upstream = label, attempts = attempt + 1, "Rate limited, retries exhausted");
            }
            return Ok(response);
        }

        let delay = policy.backoff_delay(attempt);
        attempt += 1;
        tracing::warn!(
            upstream = label,
            attempt,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            "Upstream rate limited (429), retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
