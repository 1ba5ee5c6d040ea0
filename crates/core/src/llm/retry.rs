use crate::llm::error::ModelError;
use crate::llm::{ModelAdapter, ModelExchange, Provider};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls, including the first one.
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Retries `RateLimited` with a fixed delay; every other failure is returned
/// on the spot.
#[derive(Debug, Clone)]
pub struct RateLimitRetry<A> {
    inner: A,
    policy: RetryPolicy,
}

impl<A> RateLimitRetry<A> {
    pub fn new(inner: A, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait::async_trait]
impl<A: ModelAdapter> ModelAdapter for RateLimitRetry<A> {
    fn provider(&self) -> Provider {
        self.inner.provider()
    }

    async fn analyze(&self, symbols: &[String]) -> Result<ModelExchange, ModelError> {
        let attempts = self.policy.attempts.max(1);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.inner.analyze(symbols).await {
                Err(err) if err.is_retryable() && attempt < attempts => {
                    tracing::warn!(
                        attempt,
                        attempts,
                        delay_ms = self.policy.delay.as_millis(),
                        error = %err,
                        "model rate limited; retrying"
                    );
                    tokio::time::sleep(self.policy.delay).await;
                }
                res => return res,
            }
        }
    }
}
