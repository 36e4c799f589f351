//! Connection reliability: heartbeat liveness, reconnect backoff, inbound
//! rate limiting and outbound batching with bounded queues.

mod backoff;
mod batch;
mod heartbeat;
mod link;
mod rate_limit;

pub use backoff::ReconnectBackoff;
pub use batch::{OutboundQueue, Overflow};
pub use heartbeat::{HeartbeatScheduler, Liveness};
pub use link::LinkState;
pub use rate_limit::TokenBucket;
