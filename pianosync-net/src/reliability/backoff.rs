//! Exponential reconnect backoff.
//!
//! Attempt `n` (zero-based) waits `base * multiplier^n`, capped at the
//! configured maximum. After `max_reconnect_attempts` the policy is exhausted
//! and the caller gives up for good.

use std::time::Duration;

use crate::config::ReliabilityConfig;

#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    multiplier: f64,
    max_delay: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(config: &ReliabilityConfig) -> Self {
        Self {
            base: config.base_reconnect_delay,
            multiplier: config.backoff_multiplier,
            max_delay: config.max_reconnect_delay,
            max_attempts: config.max_reconnect_attempts,
            attempt: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let delay = self.delay_for(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.base.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Call after a successful reconnect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(attempts: u32) -> ReliabilityConfig {
        ReliabilityConfig {
            heartbeat_interval: Duration::from_secs(1),
            max_reconnect_attempts: attempts,
            base_reconnect_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            max_reconnect_delay: Duration::from_millis(40),
        }
    }

    #[test]
    fn backoff_exponentially_grows_then_caps() {
        let mut backoff = ReconnectBackoff::new(&policy(5));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(20)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(40)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(40)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(40)));
        assert_eq!(backoff.next_delay(), None);
        assert!(backoff.is_exhausted());
    }

    #[test]
    fn reset_restores_base_delay() {
        let mut backoff = ReconnectBackoff::new(&policy(3));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn zero_attempts_gives_up_immediately() {
        let mut backoff = ReconnectBackoff::new(&policy(0));
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn huge_attempt_counts_stay_capped() {
        let mut config = policy(u32::MAX);
        config.backoff_multiplier = 10.0;
        let mut backoff = ReconnectBackoff::new(&config);
        for _ in 0..400 {
            assert!(backoff.next_delay().unwrap() <= Duration::from_millis(40));
        }
    }
}
