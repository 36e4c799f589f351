//! Per-connection token bucket for inbound messages.

use std::time::Instant;

use crate::config::RateLimitConfig;

#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate_per_sec: u32,
    capacity: u32,
    available: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket. A rate of zero disables limiting.
    pub fn new(config: RateLimitConfig, now: Instant) -> Self {
        Self {
            rate_per_sec: config.max_messages_per_second,
            capacity: config.max_burst_size,
            available: config.max_burst_size as f64,
            last_refill: now,
        }
    }

    /// Take one token if available.
    pub fn try_acquire_at(&mut self, now: Instant) -> bool {
        if self.rate_per_sec == 0 {
            return true;
        }

        if now > self.last_refill {
            let elapsed = now.duration_since(self.last_refill).as_secs_f64();
            self.available =
                (self.available + elapsed * self.rate_per_sec as f64).min(self.capacity as f64);
            self.last_refill = now;
        }

        if self.available >= 1.0 {
            self.available -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn bucket(rate: u32, burst: u32, now: Instant) -> TokenBucket {
        TokenBucket::new(
            RateLimitConfig {
                max_messages_per_second: rate,
                max_burst_size: burst,
            },
            now,
        )
    }

    #[test]
    fn burst_then_reject() {
        let start = Instant::now();
        let mut b = bucket(100, 120, start);
        let accepted = (0..150).filter(|_| b.try_acquire_at(start)).count();
        assert_eq!(accepted, 120);
    }

    #[test]
    fn refills_at_configured_rate() {
        let start = Instant::now();
        let mut b = bucket(100, 120, start);
        for _ in 0..120 {
            assert!(b.try_acquire_at(start));
        }
        assert!(!b.try_acquire_at(start));

        let later = start + Duration::from_millis(100);
        let accepted = (0..50).filter(|_| b.try_acquire_at(later)).count();
        assert_eq!(accepted, 10);
    }

    #[test]
    fn refill_is_capped_at_burst() {
        let start = Instant::now();
        let mut b = bucket(100, 5, start);
        let much_later = start + Duration::from_secs(60);
        let accepted = (0..50).filter(|_| b.try_acquire_at(much_later)).count();
        assert_eq!(accepted, 5);
    }

    #[test]
    fn zero_rate_disables_limiting() {
        let now = Instant::now();
        let mut b = bucket(0, 0, now);
        assert!((0..10_000).all(|_| b.try_acquire_at(now)));
    }
}
