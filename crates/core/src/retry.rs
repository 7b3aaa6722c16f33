use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::EngineError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay_ms: 25, max_delay_ms: 400 }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// How a failed lookup attempt is treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Attempt {
    /// The record may exist but an index has not caught up yet.
    StaleReadSuspected,
    Fatal,
}

fn classify(error: &EngineError) -> Attempt {
    match error {
        EngineError::NotFound(_) => Attempt::StaleReadSuspected,
        _ => Attempt::Fatal,
    }
}

/// Runs `lookup`, retrying not-found outcomes with exponential backoff. Once
/// retries are exhausted the last not-found error is returned.
pub async fn retry_stale_reads<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut lookup: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut attempt = 0_u32;
    loop {
        match lookup().await {
            Ok(value) => return Ok(value),
            Err(error)
                if classify(&error) == Attempt::StaleReadSuspected
                    && attempt < policy.max_retries =>
            {
                let delay = policy.backoff(attempt);
                warn!(
                    event_name = "engine.lookup.stale_read_retry",
                    operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "lookup found nothing; retrying in case the read was stale"
                );
                attempt += 1;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(error) => return Err(error),
        }
    }
}
