//! Token-bucket rate limiting for the LLM gateway (design §4.2).
//!
//! Grounded on the same refill arithmetic as the streaming pipeline's
//! per-tenant rate limiter, simplified to one bucket per gateway instance
//! since the gateway itself is the shared resource being protected.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// A token bucket: `requests_per_second` tokens refill continuously, up to
/// `burst` capacity. [`RateLimiter::acquire`] blocks until one token is
/// available.
pub struct RateLimiter {
    state: Mutex<BucketState>,
    refill_rate: f64,
    capacity: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// `burst` is the bucket capacity; the design fixes it at 5.
    #[must_use]
    pub fn new(requests_per_second: f64, burst: u32) -> Self {
        let capacity = f64::from(burst).max(1.0);
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            refill_rate: requests_per_second.max(0.0),
            capacity,
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }

    /// Attempts to take one token without waiting.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Blocks (asynchronously) until a token is available, then takes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else if self.refill_rate > 0.0 {
                    Some(Duration::from_secs_f64((1.0 - state.tokens) / self.refill_rate))
                } else {
                    Some(Duration::from_millis(50))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_allows_immediate_requests_up_to_capacity() {
        let limiter = RateLimiter::new(1.0, 5);
        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn acquire_never_exceeds_rps_times_t_plus_burst() {
        let rps = 10.0;
        let burst = 5u32;
        let limiter = RateLimiter::new(rps, burst);
        let start = Instant::now();
        let mut granted = 0u32;
        while start.elapsed() < Duration::from_millis(300) {
            limiter.acquire().await;
            granted += 1;
        }
        let t = start.elapsed().as_secs_f64();
        let bound = rps * t + f64::from(burst) + 1.0; // slack for scheduling jitter
        assert!(
            f64::from(granted) <= bound,
            "granted {granted} exceeds rps*t+burst bound {bound}"
        );
    }
}
