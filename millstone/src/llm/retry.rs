use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::CorpusError;

/// Exponential backoff with jitter for upstream calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying attempt `k` (zero-based): `min(cap, base·2^k)`
    /// plus up to 10 % jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base.saturating_mul(2u32.saturating_pow(attempt));
        let capped = exp.min(self.cap);
        let jitter = rand::rng().random_range(0.0..0.1);
        capped.mul_f64(1.0 + jitter)
    }
}

/// Run `op` until it succeeds, the error stops being retriable, or the
/// attempt budget runs out. A server-supplied `Retry-After` overrides the
/// computed delay.
pub async fn with_retries<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, CorpusError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CorpusError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retriable() && attempt + 1 < policy.max_attempts => {
                let delay = match &err {
                    CorpusError::RateLimited {
                        retry_after: Some(hint),
                        ..
                    } => *hint,
                    _ => policy.delay(attempt),
                };
                tracing::debug!(
                    target: "millstone::llm",
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying upstream call"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base: Duration::from_millis(1),
            cap: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retries(fast_policy(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CorpusError::Upstream("flaky".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retriable_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CorpusError::InvalidInput("bad".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempt_budget_is_respected() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CorpusError::Upstream("down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(300),
        };
        let d0 = policy.delay(0);
        let d3 = policy.delay(3);
        assert!(d0 >= Duration::from_secs(1) && d0 < Duration::from_millis(1150));
        assert!(d3 >= Duration::from_secs(8) && d3 < Duration::from_millis(8900));
        assert!(policy.delay(20) <= Duration::from_secs(330));
    }
}
