use std::time::Duration;

use rand::Rng;

use crate::BackoffPolicy;

/// Exponential delay sequence for one retry loop.
///
/// Doubles from `base_delay_ms` up to `max_delay_ms`, adding up to 10%
/// jitter so clients sharing a store do not retry in lockstep.
#[derive(Debug)]
pub(crate) struct Backoff {
    policy: BackoffPolicy,
    attempts: usize,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(policy: BackoffPolicy) -> Self {
        Self {
            current: Duration::from_millis(policy.base_delay_ms),
            policy,
            attempts: 0,
        }
    }

    /// Number of delays handed out so far
    pub(crate) fn attempts(&self) -> usize {
        self.attempts
    }

    /// Next delay, or `None` once `max_retries` is used up (0 = unlimited).
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if self.policy.max_retries != 0 && self.attempts >= self.policy.max_retries {
            return None;
        }
        self.attempts += 1;

        let delay = self.current;
        let max = Duration::from_millis(self.policy.max_delay_ms);
        self.current = (self.current * 2).min(max);

        let jitter_ms = delay.as_millis() as u64 / 10;
        if jitter_ms == 0 {
            return Some(delay);
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
        Some((delay + Duration::from_millis(jitter)).min(max.max(delay)))
    }
}
