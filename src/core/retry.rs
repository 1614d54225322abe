use anyhow::{Result, anyhow};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Pure retry/backoff description, applied uniformly at every external-call
/// boundary. Kept as plain data so the behavior is testable apart from the
/// business logic that uses it.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryPolicy {
    #[serde(rename = "maxAttempts", default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(rename = "baseDelay", with = "humantime_serde", default = "default_base_delay")]
    pub base_delay: Duration,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(with = "humantime_serde", default = "default_call_timeout")]
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            multiplier: default_multiplier(),
            timeout: default_call_timeout(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> Duration {
    Duration::from_millis(500)
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_call_timeout() -> Duration {
    Duration::from_secs(10)
}

impl RetryPolicy {
    /// Delay before the (attempt+1)-th retry: base * multiplier^attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        self.base_delay.mul_f64(factor.max(1.0))
    }
}

/// Run `op` with a per-call timeout, retrying up to the policy's budget with
/// exponential backoff. Returns the last error once the budget is exhausted;
/// callers map that into their stage's fail-safe state.
pub async fn with_retries<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = anyhow!("{what}: no attempts made");

    for attempt in 0..policy.max_attempts.max(1) {
        match tokio::time::timeout(policy.timeout, op()).await {
            Ok(Ok(v)) => return Ok(v),
            Ok(Err(e)) => {
                warn!(%what, attempt, error = %e, "call failed");
                last_err = e;
            }
            Err(_) => {
                warn!(%what, attempt, timeout = ?policy.timeout, "call timed out");
                last_err = anyhow!("{what}: timed out after {:?}", policy.timeout);
            }
        }

        if attempt + 1 < policy.max_attempts {
            tokio::time::sleep(policy.delay_for(attempt)).await;
        }
    }

    Err(last_err)
}
