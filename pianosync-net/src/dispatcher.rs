//! Single-writer dispatch path.
//!
//! The dispatcher exclusively owns the active note store and the connection
//! registry. Every inbound frame, timer tick and connect/disconnect goes
//! through `&mut self`, so there is exactly one mutator and no locking.

use std::time::Instant;

use log::{debug, info, warn};

use pianosync_types::{now_millis, ErrorCode, Message, MessageBody, Source};

use crate::codec::{self, DecodeError};
use crate::config::NetConfig;
use crate::protocol::{ConnectionId, ErrorFrame, OutboundFrame};
use crate::registry::ConnectionRegistry;
use crate::reliability::HeartbeatScheduler;
use crate::store::ActiveNoteStore;

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// The store changed; the new version was broadcast.
    Applied { state_version: u64 },
    /// Forwarded to the other connections unchanged.
    PassedThrough,
    /// A client asked for the current state and was sent a snapshot.
    Resynced,
    /// Dropped; an error frame went back to the sender.
    Rejected(ErrorCode),
    /// The connection is no longer registered.
    UnknownConnection,
}

/// Result of one timer tick.
#[derive(Debug, Default)]
pub struct TickReport {
    pub heartbeat_sent: bool,
    pub swept: Vec<ConnectionId>,
}

pub struct Dispatcher {
    store: ActiveNoteStore,
    registry: ConnectionRegistry,
    heartbeat: HeartbeatScheduler,
    config: NetConfig,
}

impl Dispatcher {
    pub fn new(config: NetConfig, now: Instant) -> Self {
        Self {
            store: ActiveNoteStore::new(now_millis()),
            registry: ConnectionRegistry::new(config),
            heartbeat: HeartbeatScheduler::new(config.reliability.heartbeat_interval, now),
            config,
        }
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn store(&self) -> &ActiveNoteStore {
        &self.store
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Register a new connection and queue its initial snapshot.
    pub fn connect(&mut self, now: Instant) -> ConnectionId {
        let id = self.registry.register(now);
        let snapshot = Message::state_sync(self.store.snapshot(self.registry.active_count()));
        self.registry.send_to(id, snapshot.into(), now);
        id
    }

    /// Drop a connection and everything queued for it.
    pub fn disconnect(&mut self, id: ConnectionId) {
        self.registry.unregister(id);
    }

    /// Process one raw frame from `from`.
    pub fn handle_inbound(&mut self, from: ConnectionId, text: &str, now: Instant) -> InboundOutcome {
        if !self.registry.contains(from) {
            debug!("Frame from unregistered {} ignored", from);
            return InboundOutcome::UnknownConnection;
        }

        let msg = match codec::deserialize_inbound(text, now_millis()) {
            Ok(msg) => msg,
            Err(err) => return self.reject_decode(from, err, now),
        };

        // Heartbeats are exempt from the limiter so liveness never starves.
        // Relays are coalesced instead, one per interval per sender.
        if let MessageBody::Heartbeat { client_id } = &msg.body {
            self.registry.mark_pong(from, now);
            if let Some(label) = client_id {
                self.registry.set_client_label(from, label);
            }
            if msg.source == Source::Client && self.registry.claim_heartbeat_relay(from, now) {
                self.registry.broadcast(&msg.clone().into(), Some(from), now);
            }
            return InboundOutcome::PassedThrough;
        }

        if !self.registry.try_acquire(from, now) {
            debug!("{} rate limited ({})", from, msg.type_tag());
            let payload = serde_json::to_value(&msg).ok();
            let frame = ErrorFrame::new(
                ErrorCode::RateLimited,
                format!(
                    "more than {} messages per second",
                    self.config.rate_limit.max_messages_per_second
                ),
                payload,
            );
            self.registry.send_to(from, frame.into(), now);
            return InboundOutcome::Rejected(ErrorCode::RateLimited);
        }

        match &msg.body {
            MessageBody::StateSync(_) => {
                let snapshot =
                    Message::state_sync(self.store.snapshot(self.registry.active_count()));
                self.registry.send_to(from, snapshot.into(), now);
                InboundOutcome::Resynced
            }
            MessageBody::Heartbeat { .. } => InboundOutcome::PassedThrough,
            MessageBody::ChordOn { .. } => {
                // Display echo first, so receivers can label the chord
                // before the snapshot that contains it arrives.
                self.registry.broadcast(&msg.clone().into(), Some(from), now);
                self.apply_and_broadcast(&msg, now)
            }
            MessageBody::NoteOn { .. } | MessageBody::NoteOff { .. } | MessageBody::AllNotesOff => {
                self.apply_and_broadcast(&msg, now)
            }
        }
    }

    fn apply_and_broadcast(&mut self, msg: &Message, now: Instant) -> InboundOutcome {
        let active = self.registry.active_count();
        match self.store.apply(msg, now_millis(), active) {
            Some(sync) => {
                let state_version = sync.state_version;
                debug!("{} applied -> version {}", msg.type_tag(), state_version);
                self.registry
                    .broadcast(&Message::state_sync(sync).into(), None, now);
                InboundOutcome::Applied { state_version }
            }
            None => InboundOutcome::PassedThrough,
        }
    }

    fn reject_decode(&mut self, from: ConnectionId, err: DecodeError, now: Instant) -> InboundOutcome {
        warn!("Rejected frame from {}: {}", from, err);
        let code = err.detail_code();
        self.registry.send_to(from, err.to_error_frame().into(), now);
        InboundOutcome::Rejected(code)
    }

    /// Drive timers: heartbeat emission, dead-connection sweep, batch flushes.
    pub fn tick(&mut self, now: Instant) -> TickReport {
        let mut report = TickReport::default();

        if self.heartbeat.due(now) {
            self.registry
                .broadcast(&Message::heartbeat(Source::Server, None).into(), None, now);
            self.registry.mark_ping_sent(now);
            report.heartbeat_sent = true;
        }

        report.swept = self.registry.sweep_dead(now);
        if !report.swept.is_empty() {
            info!(
                "Swept {} dead connection(s), {} active",
                report.swept.len(),
                self.registry.active_count()
            );
        }

        self.registry.flush_due(now);
        report
    }

    /// Frames ready to be written for one connection.
    pub fn drain_ready(&mut self, id: ConnectionId) -> Vec<OutboundFrame> {
        self.registry.drain_ready(id)
    }

    /// Force out every pending batch (shutdown path).
    pub fn flush_all(&mut self) {
        self.registry.flush_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BatchingConfig, RateLimitConfig, ReliabilityConfig};
    use std::time::Duration;

    fn unbatched() -> NetConfig {
        NetConfig {
            batching: BatchingConfig {
                max_batch_size: 1,
                ..Default::default()
            },
            reliability: ReliabilityConfig {
                heartbeat_interval: Duration::from_millis(100),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn note_on(midi: u8, vel: u8) -> String {
        format!(
            r#"{{"type":"note_on","timestamp":1,"source":"client","midiNumber":{},"velocity":{}}}"#,
            midi, vel
        )
    }

    fn messages(frames: Vec<OutboundFrame>) -> Vec<Message> {
        frames
            .into_iter()
            .flat_map(|f| match f {
                OutboundFrame::Message(m) => vec![m],
                OutboundFrame::Batch(b) => b.messages,
                _ => vec![],
            })
            .collect()
    }

    #[test]
    fn new_connection_gets_initial_snapshot() {
        let now = Instant::now();
        let mut d = Dispatcher::new(unbatched(), now);
        let a = d.connect(now);
        let msgs = messages(d.drain_ready(a));
        match &msgs[..] {
            [Message {
                body: MessageBody::StateSync(sync),
                ..
            }] => {
                assert_eq!(sync.state_version, 0);
                assert_eq!(sync.active_client_count, 1);
            }
            other => panic!("expected one StateSync, got {:?}", other),
        }
    }

    #[test]
    fn chord_echo_precedes_state_sync_for_others() {
        let now = Instant::now();
        let mut d = Dispatcher::new(unbatched(), now);
        let a = d.connect(now);
        let b = d.connect(now);
        d.drain_ready(a);
        d.drain_ready(b);

        let chord = r#"{"type":"chord_on","timestamp":3,"source":"client","chordName":"Am","notes":[{"midiNumber":57,"velocity":70},{"midiNumber":60,"velocity":70},{"midiNumber":64,"velocity":70}]}"#;
        assert_eq!(
            d.handle_inbound(a, chord, now),
            InboundOutcome::Applied { state_version: 1 }
        );

        let tags: Vec<&str> = messages(d.drain_ready(b)).iter().map(|m| m.type_tag()).collect();
        assert_eq!(tags, vec!["chord_on", "state_sync"]);
        let tags: Vec<&str> = messages(d.drain_ready(a)).iter().map(|m| m.type_tag()).collect();
        assert_eq!(tags, vec!["state_sync"]);
    }

    #[test]
    fn client_state_sync_is_a_private_resync() {
        let now = Instant::now();
        let mut d = Dispatcher::new(unbatched(), now);
        let a = d.connect(now);
        let b = d.connect(now);
        d.handle_inbound(a, &note_on(60, 10), now);
        d.drain_ready(a);
        d.drain_ready(b);

        let forged = r#"{"type":"state_sync","timestamp":4,"source":"client","activeNotes":[],"lastUpdateTimestamp":1,"activeClientCount":0,"stateVersion":999}"#;
        assert_eq!(d.handle_inbound(b, forged, now), InboundOutcome::Resynced);
        assert!(d.drain_ready(a).is_empty());
        match &messages(d.drain_ready(b))[..] {
            [Message {
                body: MessageBody::StateSync(sync),
                ..
            }] => {
                assert_eq!(sync.state_version, 1);
                assert_eq!(sync.active_notes.len(), 1);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
        assert_eq!(d.store().version(), 1);
    }

    #[test]
    fn client_heartbeat_is_pong_and_pass_through() {
        let start = Instant::now();
        let mut d = Dispatcher::new(unbatched(), start);
        let a = d.connect(start);
        let b = d.connect(start);
        d.drain_ready(a);
        d.drain_ready(b);

        let later = start + Duration::from_millis(150);
        let beat = r#"{"type":"heartbeat","timestamp":2,"source":"client","clientId":"alice"}"#;
        assert_eq!(d.handle_inbound(a, beat, later), InboundOutcome::PassedThrough);
        assert_eq!(d.registry().get(a).unwrap().client_label(), Some("alice"));
        assert_eq!(messages(d.drain_ready(b)).len(), 1);
        assert!(d.drain_ready(a).is_empty());

        let report = d.tick(start + Duration::from_millis(250));
        assert_eq!(report.swept, vec![b]);
    }

    #[test]
    fn heartbeat_flood_does_not_evict_peer_snapshots() {
        let now = Instant::now();
        let mut d = Dispatcher::new(NetConfig::default(), now);
        let a = d.connect(now);
        let b = d.connect(now);
        assert_eq!(
            d.handle_inbound(a, &note_on(60, 10), now),
            InboundOutcome::Applied { state_version: 1 }
        );

        let beat = r#"{"type":"heartbeat","timestamp":2,"source":"client","clientId":"alice"}"#;
        for _ in 0..300 {
            assert_eq!(d.handle_inbound(a, beat, now), InboundOutcome::PassedThrough);
        }
        d.flush_all();

        let to_b = messages(d.drain_ready(b));
        let versions: Vec<u64> = to_b
            .iter()
            .filter_map(|m| match &m.body {
                MessageBody::StateSync(sync) => Some(sync.state_version),
                _ => None,
            })
            .collect();
        assert_eq!(versions, vec![0, 1]);
        let relayed = to_b
            .iter()
            .filter(|m| matches!(m.body, MessageBody::Heartbeat { .. }))
            .count();
        assert_eq!(relayed, 1);
        assert_eq!(d.registry().get(b).unwrap().queue().dropped_total(), 0);
    }

    #[test]
    fn tick_emits_heartbeats_on_interval() {
        let start = Instant::now();
        let mut d = Dispatcher::new(unbatched(), start);
        let a = d.connect(start);
        d.drain_ready(a);

        assert!(!d.tick(start + Duration::from_millis(50)).heartbeat_sent);
        assert!(d.tick(start + Duration::from_millis(100)).heartbeat_sent);
        let msgs = messages(d.drain_ready(a));
        assert!(matches!(
            &msgs[..],
            [Message { source: Source::Server, body: MessageBody::Heartbeat { .. }, .. }]
        ));
        assert!(d
            .registry()
            .get(a)
            .unwrap()
            .liveness()
            .last_ping_sent_at()
            .is_some());
    }

    #[test]
    fn rate_limit_error_goes_only_to_sender() {
        let now = Instant::now();
        let mut config = unbatched();
        config.rate_limit = RateLimitConfig {
            max_messages_per_second: 1,
            max_burst_size: 1,
        };
        let mut d = Dispatcher::new(config, now);
        let a = d.connect(now);
        let b = d.connect(now);
        d.drain_ready(a);
        d.drain_ready(b);

        d.handle_inbound(a, &note_on(60, 1), now);
        assert_eq!(
            d.handle_inbound(a, &note_on(61, 1), now),
            InboundOutcome::Rejected(ErrorCode::RateLimited)
        );
        let to_a = d.drain_ready(a);
        assert!(to_a.iter().any(|f| matches!(
            f,
            OutboundFrame::Error(e) if e.code == ErrorCode::RateLimited && e.payload.is_some()
        )));
        let to_b = d.drain_ready(b);
        assert!(to_b.iter().all(|f| !matches!(f, OutboundFrame::Error(_))));
        assert_eq!(d.store().version(), 1);
    }

    #[test]
    fn unknown_connection_is_ignored() {
        let now = Instant::now();
        let mut d = Dispatcher::new(unbatched(), now);
        assert_eq!(
            d.handle_inbound(ConnectionId::new(42), &note_on(60, 1), now),
            InboundOutcome::UnknownConnection
        );
        assert_eq!(d.store().version(), 0);
    }
}
