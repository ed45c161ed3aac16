//! Fixed-interval rate limiter for outbound bridge calls.
//!
//! Callers `acquire()` before each request; the limiter spaces grants at
//! `1 / rate_per_second` intervals regardless of how many tasks contend.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct FixedIntervalLimiter {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl FixedIntervalLimiter {
    /// `rate_per_second <= 0` disables pacing entirely.
    pub fn new(rate_per_second: f64) -> Self {
        let interval = if rate_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / rate_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Wait until the next slot is free, then claim it.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }
        let wake_at = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = if *next > now { *next } else { now };
            *next = slot + self.interval;
            slot
        };
        tokio::time::sleep_until(wake_at).await;
    }
}
