use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct TokenBucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Blocking token bucket shared by every request an enricher issues.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    tokens_per_second: f64,
    burst: f64,
    state: Mutex<TokenBucketState>,
}

impl TokenBucketLimiter {
    /// `None` when `tokens_per_second` is zero, meaning unlimited.
    pub fn new(tokens_per_second: u64, burst: u64) -> Option<Self> {
        if tokens_per_second == 0 {
            return None;
        }
        let burst = burst.max(1) as f64;
        Some(Self {
            tokens_per_second: tokens_per_second as f64,
            burst,
            state: Mutex::new(TokenBucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        })
    }

    pub fn acquire(&self) {
        while let Some(wait) = self.try_take(Instant::now()) {
            std::thread::sleep(wait);
        }
    }

    /// Takes a token if one is available at `now`, otherwise returns how long
    /// to wait before the next one refills.
    fn try_take(&self, now: Instant) -> Option<Duration> {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let elapsed = now.saturating_duration_since(guard.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            guard.tokens = (guard.tokens + elapsed * self.tokens_per_second).min(self.burst);
            guard.last_refill = now;
        }
        if guard.tokens >= 1.0 {
            guard.tokens -= 1.0;
            None
        } else {
            let deficit = (1.0 - guard.tokens).max(0.0);
            let wait_seconds = (deficit / self.tokens_per_second).max(0.001);
            Some(Duration::from_secs_f64(wait_seconds))
        }
    }
}
