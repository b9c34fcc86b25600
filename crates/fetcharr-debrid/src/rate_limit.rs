//! Process-wide token bucket for gateway calls.

use std::sync::Mutex;
use std::time::{Duration, Instant};

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket: `burst` requests immediately, `sustained` per second after.
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Create a bucket that starts full.
    #[must_use]
    pub fn new(burst: u32, sustained_per_sec: u32) -> Self {
        Self {
            capacity: f64::from(burst.max(1)),
            refill_per_sec: f64::from(sustained_per_sec.max(1)),
            state: Mutex::new(BucketState {
                tokens: f64::from(burst.max(1)),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Wait until a token is available and consume it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = match self.state.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64(
                        (1.0 - state.tokens) / self.refill_per_sec,
                    ))
                }
            };
            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_is_served_immediately() {
        let limiter = RateLimiter::new(8, 4);
        let started = Instant::now();
        for _ in 0..8 {
            limiter.acquire().await;
        }
        assert!(
            started.elapsed() < Duration::from_millis(100),
            "burst tokens should not block"
        );
    }

    #[tokio::test]
    async fn sustained_rate_throttles_after_burst() {
        let limiter = RateLimiter::new(2, 10);
        let started = Instant::now();
        for _ in 0..4 {
            limiter.acquire().await;
        }
        // Two tokens over the burst at 10/s needs roughly 200ms.
        assert!(
            started.elapsed() >= Duration::from_millis(150),
            "requests beyond the burst must wait for refill"
        );
    }
}
