//! Token-bucket rate limiter for the write pipeline.

use tokio::time::{sleep, Duration, Instant};

/// A token bucket: `rate` tokens accrue per second up to `burst`.
///
/// A cold bucket starts full, so a burst of up to `burst` frames goes out
/// immediately; sustained traffic settles at `rate` frames per second.
/// [`acquire`](Self::acquire) is cancel-safe: dropping the future mid-wait
/// consumes nothing.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    tokens: f64,
    updated: Instant,
}

impl TokenBucket {
    pub fn new(rate: f64, burst: usize) -> Self {
        let rate = rate.max(f64::MIN_POSITIVE);
        let burst = (burst.max(1)) as f64;
        Self {
            rate,
            burst,
            tokens: burst,
            updated: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.updated).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.updated = now;
    }

    /// Waits until one token is available and consumes it.
    pub async fn acquire(&mut self) {
        loop {
            let now = Instant::now();
            self.refill(now);
            if self.tokens >= 1.0 {
                self.tokens -= 1.0;
                return;
            }
            let wait = (1.0 - self.tokens) / self.rate;
            sleep(Duration::from_secs_f64(wait)).await;
        }
    }
}
