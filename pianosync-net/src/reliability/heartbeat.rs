//! Heartbeat timing and per-connection liveness.

use std::time::{Duration, Instant};

/// Fires once per interval.
#[derive(Debug, Clone)]
pub struct HeartbeatScheduler {
    interval: Duration,
    next_due: Instant,
}

impl HeartbeatScheduler {
    /// First beat is due one interval after `now`.
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next_due: now + interval,
        }
    }

    /// True at most once per interval. Missed beats are not replayed.
    pub fn due(&mut self, now: Instant) -> bool {
        if now < self.next_due {
            return false;
        }
        self.next_due = now + self.interval;
        true
    }

    pub fn next_due(&self) -> Instant {
        self.next_due
    }
}

/// Ping/pong bookkeeping for one connection.
#[derive(Debug, Clone)]
pub struct Liveness {
    last_ping_sent_at: Option<Instant>,
    last_pong_received_at: Instant,
    last_relayed_at: Option<Instant>,
}

impl Liveness {
    /// A fresh connection counts as having just answered.
    pub fn new(now: Instant) -> Self {
        Self {
            last_ping_sent_at: None,
            last_pong_received_at: now,
            last_relayed_at: None,
        }
    }

    pub fn ping_sent(&mut self, now: Instant) {
        self.last_ping_sent_at = Some(now);
    }

    pub fn pong_received(&mut self, now: Instant) {
        if now > self.last_pong_received_at {
            self.last_pong_received_at = now;
        }
    }

    /// Claim the right to relay this connection's heartbeat to its peers.
    /// At most one relay per `interval`; the rest only count as pongs.
    pub fn claim_relay(&mut self, now: Instant, interval: Duration) -> bool {
        match self.last_relayed_at {
            Some(last) if now.saturating_duration_since(last) < interval => false,
            _ => {
                self.last_relayed_at = Some(now);
                true
            }
        }
    }

    /// Dead once nothing has been heard for longer than `timeout`.
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_pong_received_at) > timeout
    }

    pub fn last_ping_sent_at(&self) -> Option<Instant> {
        self.last_ping_sent_at
    }

    pub fn last_pong_received_at(&self) -> Instant {
        self.last_pong_received_at
    }
}
