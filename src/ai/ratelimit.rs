//! Token-bucket limiter bounding requests/second to the AI provider.
//! Naming follows the `TokenBucket` convention other request-heavy clients
//! in this codebase export from their rate-limiting module.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::time::sleep;

/// A simple token bucket: refills continuously at `rate` tokens/sec, caps
/// at `rate` tokens of burst. `acquire` blocks until a token is available.
pub struct TokenBucket {
    rate: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_per_second: u32) -> Self {
        let rate = rate_per_second.max(1) as f64;
        Self {
            // Starts empty, not full — a freshly built client gets no free
            // burst of `rate` instant calls before the limiter engages.
            state: Mutex::new(BucketState { tokens: 0.0, last_refill: Instant::now() }),
            rate,
        }
    }

    /// Waits until one token is available, then consumes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().expect("token bucket mutex poisoned");
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate).min(self.rate);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.rate))
                }
            };

            match wait {
                None => return,
                Some(d) => sleep(d).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blocks_on_first_call_until_refilled() {
        let bucket = TokenBucket::new(5);
        let start = Instant::now();
        bucket.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn paces_calls_at_the_configured_rate() {
        // 10 calls at 2/sec must take at least 4.5s — no initial free burst.
        let bucket = TokenBucket::new(2);
        let start = Instant::now();
        for _ in 0..10 {
            bucket.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(4_500));
    }
}
