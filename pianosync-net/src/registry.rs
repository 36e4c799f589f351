//! The set of live connections and their per-connection state.
//!
//! Transport handles are not kept here; the server owns sockets and only
//! drains ready frames from the registry. That keeps every operation here
//! synchronous and testable without a network.

use std::collections::BTreeMap;
use std::time::Instant;

use log::{info, warn};

use pianosync_types::now_millis;

use crate::config::NetConfig;
use crate::protocol::{ConnectionId, OutboundFrame, PerformanceMetrics};
use crate::reliability::{LinkState, Liveness, OutboundQueue, Overflow, TokenBucket};

/// One accepted client.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    state: LinkState,
    liveness: Liveness,
    queue: OutboundQueue,
    limiter: TokenBucket,
    /// Self-reported id from the client's heartbeats, for logs.
    client_label: Option<String>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    pub fn client_label(&self) -> Option<&str> {
        self.client_label.as_deref()
    }

    fn enqueue(&mut self, frame: OutboundFrame, now: Instant) {
        if let Some(overflow) = self.queue.push(frame, now) {
            self.report_overflow(overflow, now);
        }
    }

    fn report_overflow(&mut self, overflow: Overflow, now: Instant) {
        warn!(
            "Outbound queue for {} overflowed: dropped {} messages (depth {}, {} dropped total)",
            self.id,
            overflow.dropped,
            overflow.queue_depth,
            self.queue.dropped_total()
        );
        let metrics = OutboundFrame::PerformanceMetrics(PerformanceMetrics {
            timestamp: now_millis(),
            connection_id: self.id,
            queue_depth: overflow.queue_depth,
            dropped_messages: self.queue.dropped_total(),
        });
        self.queue.push_unbounded(metrics);
    }
}

/// Owns every connection. Only the dispatcher holds one of these.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: BTreeMap<ConnectionId, Connection>,
    next_id: u64,
    config: NetConfig,
}

impl ConnectionRegistry {
    pub fn new(config: NetConfig) -> Self {
        Self {
            connections: BTreeMap::new(),
            next_id: 0,
            config,
        }
    }

    /// Admit a new connection. It starts out alive with a full token bucket.
    pub fn register(&mut self, now: Instant) -> ConnectionId {
        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;

        let connection = Connection {
            id,
            state: LinkState::Connected,
            liveness: Liveness::new(now),
            queue: OutboundQueue::new(self.config.batching, self.config.queue),
            limiter: TokenBucket::new(self.config.rate_limit, now),
            client_label: None,
        };
        self.connections.insert(id, connection);

        info!("{} registered ({} active)", id, self.connections.len());
        id
    }

    /// Remove a connection and discard its queue. Unknown ids are ignored.
    pub fn unregister(&mut self, id: ConnectionId) -> bool {
        match self.connections.remove(&id) {
            Some(conn) => {
                info!(
                    "{} unregistered, {} queued messages discarded ({} active)",
                    id,
                    conn.queue.depth(),
                    self.connections.len()
                );
                true
            }
            None => false,
        }
    }

    pub fn mark_pong(&mut self, id: ConnectionId, now: Instant) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.liveness.pong_received(now);
        }
    }

    /// Whether a client heartbeat from `id` may be relayed to the others.
    /// Extra heartbeats within one interval still count as pongs.
    pub fn claim_heartbeat_relay(&mut self, id: ConnectionId, now: Instant) -> bool {
        let interval = self.config.reliability.heartbeat_interval;
        self.connections
            .get_mut(&id)
            .map(|conn| conn.liveness.claim_relay(now, interval))
            .unwrap_or(false)
    }

    pub fn set_client_label(&mut self, id: ConnectionId, label: &str) {
        if let Some(conn) = self.connections.get_mut(&id) {
            if conn.client_label.as_deref() != Some(label) {
                conn.client_label = Some(label.to_string());
            }
        }
    }

    pub fn mark_ping_sent(&mut self, now: Instant) {
        for conn in self.connections.values_mut() {
            conn.liveness.ping_sent(now);
        }
    }

    /// Enqueue on every live connection except `exclude`.
    pub fn broadcast(&mut self, frame: &OutboundFrame, exclude: Option<ConnectionId>, now: Instant) {
        for (id, conn) in self.connections.iter_mut() {
            if Some(*id) == exclude || !conn.state.is_live() {
                continue;
            }
            conn.enqueue(frame.clone(), now);
        }
    }

    /// Enqueue on a single connection.
    pub fn send_to(&mut self, id: ConnectionId, frame: OutboundFrame, now: Instant) -> bool {
        match self.connections.get_mut(&id) {
            Some(conn) if conn.state.is_live() => {
                conn.enqueue(frame, now);
                true
            }
            _ => false,
        }
    }

    /// Consume one inbound token for `id`.
    pub fn try_acquire(&mut self, id: ConnectionId, now: Instant) -> bool {
        self.connections
            .get_mut(&id)
            .map(|conn| conn.limiter.try_acquire_at(now))
            .unwrap_or(false)
    }

    /// Remove every connection that has been silent for two heartbeat
    /// intervals. Returns the removed ids.
    pub fn sweep_dead(&mut self, now: Instant) -> Vec<ConnectionId> {
        let timeout = self.config.reliability.liveness_timeout();
        let dead: Vec<ConnectionId> = self
            .connections
            .values_mut()
            .filter(|conn| conn.liveness.is_expired(now, timeout))
            .map(|conn| {
                conn.state = LinkState::Disconnected;
                conn.id
            })
            .collect();

        for id in &dead {
            if let Some(conn) = self.connections.remove(id) {
                warn!(
                    "{} missed heartbeats for {:?}, removing",
                    id,
                    now.saturating_duration_since(conn.liveness.last_pong_received_at())
                );
            }
        }
        dead
    }

    /// Flush batches whose delay has elapsed.
    pub fn flush_due(&mut self, now: Instant) {
        for conn in self.connections.values_mut() {
            conn.queue.poll_flush(now);
        }
    }

    /// Flush every pending batch regardless of delay.
    pub fn flush_all(&mut self) {
        for conn in self.connections.values_mut() {
            conn.queue.flush();
        }
    }

    /// Frames ready for the transport on one connection, oldest first.
    pub fn drain_ready(&mut self, id: ConnectionId) -> Vec<OutboundFrame> {
        self.connections
            .get_mut(&id)
            .map(|conn| conn.queue.drain_ready())
            .unwrap_or_default()
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn active_count(&self) -> u32 {
        self.connections
            .values()
            .filter(|conn| conn.state.is_live())
            .count() as u32
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
