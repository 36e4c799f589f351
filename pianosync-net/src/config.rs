//! Immutable tuning knobs for the reliability controller.
//!
//! Values are fixed at construction; nothing in the crate mutates them.

use std::time::Duration;

use pianosync_types::DEFAULT_PRIORITY_THRESHOLD;

/// Outbound batching.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchingConfig {
    /// Flush once this many messages are buffered.
    pub max_batch_size: usize,
    /// Flush once the oldest buffered message has waited this long.
    pub max_batch_delay: Duration,
    /// Messages with priority at or above this skip the buffer.
    pub priority_threshold: u8,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            max_batch_delay: Duration::from_millis(16),
            priority_threshold: DEFAULT_PRIORITY_THRESHOLD,
        }
    }
}

/// Inbound token bucket, per connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    pub max_messages_per_second: u32,
    pub max_burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_messages_per_second: 100,
            max_burst_size: 120,
        }
    }
}

/// Heartbeat and reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReliabilityConfig {
    pub heartbeat_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub base_reconnect_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_reconnect_delay: Duration,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            base_reconnect_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

impl ReliabilityConfig {
    /// A connection with no pong for this long is dead.
    pub fn liveness_timeout(&self) -> Duration {
        self.heartbeat_interval * 2
    }
}

/// Bound on a single connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueConfig {
    pub max_queue_len: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_queue_len: 256 }
    }
}

/// Everything the server and client need, bundled.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NetConfig {
    pub batching: BatchingConfig,
    pub rate_limit: RateLimitConfig,
    pub reliability: ReliabilityConfig,
    pub queue: QueueConfig,
}
