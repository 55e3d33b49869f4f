//! Shared token-bucket rate limiter for LLM traffic.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by every LLM/embedding client in the process.
///
/// `capacity` bounds bursts, `refill_per_sec` the sustained rate. `acquire`
/// suspends until a token is available; it never busy-waits and it never
/// blocks a runtime thread.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Arc<Self> {
        Arc::new(Self {
            capacity: capacity.max(1) as f64,
            refill_per_sec: refill_per_sec.max(0.1),
            state: Mutex::new(BucketState {
                tokens: capacity.max(1) as f64,
                last_refill: Instant::now(),
            }),
        })
    }

    /// Effectively unlimited; used when no rate limit is configured.
    pub fn unlimited() -> Arc<Self> {
        Self::new(u32::MAX, f64::from(u32::MAX))
    }

    /// Take one token, sleeping until the bucket refills if necessary.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = Instant::now();
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently available (diagnostic).
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        let elapsed = state.last_refill.elapsed().as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = Instant::now();
        state.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_up_to_capacity_is_immediate() {
        let bucket = TokenBucket::new(3, 1.0);
        let started = Instant::now();
        for _ in 0..3 {
            bucket.acquire().await;
        }
        assert!(started.elapsed() < Duration::from_millis(50));
        assert!(bucket.available() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_bucket_waits_for_refill() {
        let bucket = TokenBucket::new(1, 10.0);
        bucket.acquire().await;
        let started = Instant::now();
        bucket.acquire().await;
        // 10 tokens/sec => ~100ms for the next token under paused time.
        assert!(started.elapsed() >= Duration::from_millis(90));
    }
}
