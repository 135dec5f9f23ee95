// src/backoff.rs
//
// Reusable bounded-jitter retry policy, decoupled from the scheduler loop so
// a degraded RPC endpoint is not hammered at a fixed interval.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl RetryPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// Next delay: exponential in the attempt count, capped at `max`, with
    /// the second half of the interval randomized (delay in [cap/2, cap]).
    pub fn next_delay(&mut self) -> Duration {
        let base_ms = self.base.as_millis().max(1) as u64;
        let max_ms = self.max.as_millis().max(1) as u64;
        let capped = base_ms
            .saturating_mul(1u64 << self.attempt.min(20))
            .min(max_ms);
        self.attempt = self.attempt.saturating_add(1);

        let half = (capped / 2).max(1);
        let jitter = rand::thread_rng().gen_range(0..=half);
        Duration::from_millis(half + jitter)
    }

    /// Call after a successful cycle so the next failure starts over at base.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
