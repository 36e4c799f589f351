//! Network client for the shared piano state.
//!
//! Connects to a server, sends note events, and keeps a local mirror of the
//! active note set from the server's snapshots. A lost link is retried with
//! exponential backoff until the attempt budget runs out.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, BufReader, BufWriter, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::Instant;

use log::{debug, error, info, warn};

use pianosync_types::{
    now_millis, Message, MessageBody, NoteEvent, Source, StateSync, ValidationError,
};

use crate::codec::{decode_frame, serialize, DecodeError};
use crate::config::ReliabilityConfig;
use crate::framing::{read_frame, write_frame};
use crate::protocol::{ErrorFrame, OutboundFrame, PerformanceMetrics};
use crate::reliability::{LinkState, Liveness, ReconnectBackoff};

/// Something the application may want to react to, returned from `poll`.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    LinkStateChanged(LinkState),
    /// The local mirror was replaced by a newer snapshot.
    StateUpdated { state_version: u64 },
    /// A note or chord event relayed from another client.
    Relayed(Message),
    /// The server rejected something we sent.
    Error(ErrorFrame),
    /// The server dropped messages queued for us.
    Metrics(PerformanceMetrics),
}

/// Why a send failed.
#[derive(Debug)]
pub enum ClientError {
    /// The message never left: it failed catalog checks locally.
    Invalid(ValidationError),
    /// No live link to send on.
    NotConnected(LinkState),
    Io(io::Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Invalid(e) => write!(f, "invalid message: {}", e),
            ClientError::NotConnected(state) => write!(f, "not connected ({:?})", state),
            ClientError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Invalid(e) => Some(e),
            ClientError::Io(e) => Some(e),
            ClientError::NotConnected(_) => None,
        }
    }
}

impl From<ValidationError> for ClientError {
    fn from(e: ValidationError) -> Self {
        ClientError::Invalid(e)
    }
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        ClientError::Io(e)
    }
}

/// Frames received from the server via background thread.
enum ServerUpdate {
    Frame(OutboundFrame),
    Undecodable(DecodeError),
    Closed,
}

/// Live socket halves. Dropped as a unit when the link goes down.
struct Link {
    writer: BufWriter<TcpStream>,
    update_rx: Receiver<ServerUpdate>,
}

impl Link {
    fn open(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let read_stream = stream.try_clone()?;

        let (update_tx, update_rx) = mpsc::channel();
        thread::spawn(move || {
            server_reader_thread(read_stream, update_tx);
        });

        Ok(Self {
            writer: BufWriter::new(stream),
            update_rx,
        })
    }

    fn send(&mut self, msg: &Message) -> io::Result<()> {
        write_frame(&mut self.writer, &serialize(msg)?)?;
        self.writer.flush()
    }

    fn close(self) {
        let _ = self.writer.get_ref().shutdown(Shutdown::Both);
    }
}

/// A client connected to a sync server.
pub struct PianoClient {
    addr: String,
    client_id: String,
    config: ReliabilityConfig,
    state: LinkState,
    link: Option<Link>,
    backoff: ReconnectBackoff,
    next_attempt_at: Option<Instant>,
    liveness: Liveness,
    /// Local mirror of the server's active notes.
    active_notes: BTreeMap<u8, u8>,
    /// `None` until the first snapshot after (re)connecting.
    state_version: Option<u64>,
    last_update_timestamp: u64,
    active_client_count: u32,
    pending_events: Vec<ClientEvent>,
}

impl PianoClient {
    /// Connect to a server. Fails if the first attempt cannot be made;
    /// later drops are retried from `poll`.
    pub fn connect(addr: &str, client_id: &str, config: ReliabilityConfig) -> io::Result<Self> {
        info!("Connecting to server at {}", addr);

        let link = Link::open(addr)?;
        let now = Instant::now();

        let mut client = Self {
            addr: addr.to_string(),
            client_id: client_id.to_string(),
            config,
            state: LinkState::Connecting,
            link: Some(link),
            backoff: ReconnectBackoff::new(&config),
            next_attempt_at: None,
            liveness: Liveness::new(now),
            active_notes: BTreeMap::new(),
            state_version: None,
            last_update_timestamp: 0,
            active_client_count: 0,
            pending_events: Vec::new(),
        };
        client.transition(LinkState::Connected);
        info!("Connected to {} as '{}'", addr, client_id);
        Ok(client)
    }

    pub fn link_state(&self) -> LinkState {
        self.state
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Mirrored active notes: MIDI number to velocity.
    pub fn active_notes(&self) -> &BTreeMap<u8, u8> {
        &self.active_notes
    }

    pub fn state_version(&self) -> Option<u64> {
        self.state_version
    }

    pub fn last_update_timestamp(&self) -> u64 {
        self.last_update_timestamp
    }

    pub fn active_client_count(&self) -> u32 {
        self.active_client_count
    }

    /// When the next reconnect attempt is scheduled, if one is.
    pub fn next_attempt_at(&self) -> Option<Instant> {
        self.next_attempt_at
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    pub fn note_on(&mut self, midi_number: u8, velocity: u8) -> Result<(), ClientError> {
        let msg = Message::note_on(Source::Client, midi_number, velocity)?;
        self.send(&msg)
    }

    pub fn note_off(&mut self, midi_number: u8, velocity: u8) -> Result<(), ClientError> {
        let msg = Message::note_off(Source::Client, midi_number, velocity)?;
        self.send(&msg)
    }

    pub fn chord_on(&mut self, notes: Vec<NoteEvent>, chord_name: Option<&str>) -> Result<(), ClientError> {
        let msg = Message::chord_on(Source::Client, notes, chord_name.map(str::to_string))?;
        self.send(&msg)
    }

    pub fn all_notes_off(&mut self) -> Result<(), ClientError> {
        self.send(&Message::all_notes_off(Source::Client))
    }

    /// Ask the server for a fresh snapshot.
    pub fn request_resync(&mut self) -> Result<(), ClientError> {
        let request = Message {
            timestamp: now_millis(),
            source: Source::Client,
            body: MessageBody::StateSync(StateSync {
                active_notes: Vec::new(),
                last_update_timestamp: self.last_update_timestamp,
                active_client_count: 0,
                state_version: self.state_version.unwrap_or(0),
            }),
        };
        self.send(&request)
    }

    /// Send a heartbeat carrying our client id.
    pub fn heartbeat(&mut self) -> Result<(), ClientError> {
        self.send(&Message::heartbeat(Source::Client, Some(self.client_id.clone())))
    }

    /// Send a catalog message as-is.
    pub fn send(&mut self, msg: &Message) -> Result<(), ClientError> {
        let Some(link) = self.link.as_mut().filter(|_| self.state.is_live()) else {
            return Err(ClientError::NotConnected(self.state));
        };
        if let Err(e) = link.send(msg) {
            warn!("Send failed: {}", e);
            self.link_lost(Instant::now());
            return Err(e.into());
        }
        Ok(())
    }

    /// Process everything received from the server, check liveness, and
    /// attempt a reconnect if one is due.
    pub fn poll(&mut self, now: Instant) -> Vec<ClientEvent> {
        match self.state {
            LinkState::Connected => self.poll_link(now),
            LinkState::Reconnecting => self.poll_reconnect(now),
            LinkState::Connecting | LinkState::Disconnected => {}
        }
        std::mem::take(&mut self.pending_events)
    }

    fn poll_link(&mut self, now: Instant) {
        loop {
            let update = match self.link.as_ref().map(|l| l.update_rx.try_recv()) {
                Some(Ok(update)) => update,
                Some(Err(TryRecvError::Empty)) => break,
                Some(Err(TryRecvError::Disconnected)) | None => ServerUpdate::Closed,
            };
            match update {
                ServerUpdate::Frame(frame) => {
                    self.liveness.pong_received(now);
                    self.handle_frame(frame);
                }
                ServerUpdate::Undecodable(e) => {
                    warn!("Ignoring undecodable frame from server: {}", e);
                }
                ServerUpdate::Closed => {
                    warn!("Server connection lost");
                    self.link_lost(now);
                    return;
                }
            }
            if !self.state.is_live() {
                return;
            }
        }

        if self.liveness.is_expired(now, self.config.liveness_timeout()) {
            warn!(
                "No traffic from server for {:?}, treating link as lost",
                now.saturating_duration_since(self.liveness.last_pong_received_at())
            );
            self.link_lost(now);
        }
    }

    fn handle_frame(&mut self, frame: OutboundFrame) {
        match frame {
            OutboundFrame::Message(msg) => self.handle_message(msg),
            OutboundFrame::Batch(batch) => {
                for msg in batch.messages {
                    self.handle_message(msg);
                }
            }
            OutboundFrame::Error(e) => {
                warn!("Server error {}: {}", e.code, e.message);
                self.pending_events.push(ClientEvent::Error(e));
            }
            OutboundFrame::PerformanceMetrics(m) => {
                warn!(
                    "Server dropped {} message(s) for us (queue depth {})",
                    m.dropped_messages, m.queue_depth
                );
                self.pending_events.push(ClientEvent::Metrics(m));
            }
        }
    }

    fn handle_message(&mut self, msg: Message) {
        match msg.body {
            MessageBody::StateSync(sync) => self.apply_snapshot(sync),
            MessageBody::Heartbeat { .. } if msg.source == Source::Server => {
                if let Err(e) = self.heartbeat() {
                    debug!("Heartbeat reply failed: {}", e);
                }
            }
            MessageBody::Heartbeat { .. } => {}
            _ => self.pending_events.push(ClientEvent::Relayed(msg)),
        }
    }

    /// Replace the mirror unless the snapshot is older than what we hold.
    fn apply_snapshot(&mut self, sync: StateSync) {
        if let Some(current) = self.state_version {
            if sync.state_version < current {
                debug!(
                    "Ignoring stale snapshot v{} (have v{})",
                    sync.state_version, current
                );
                return;
            }
        }
        self.active_notes = sync
            .active_notes
            .iter()
            .map(|n| (n.midi_number, n.velocity))
            .collect();
        self.state_version = Some(sync.state_version);
        self.last_update_timestamp = sync.last_update_timestamp;
        self.active_client_count = sync.active_client_count;
        self.pending_events.push(ClientEvent::StateUpdated {
            state_version: sync.state_version,
        });
    }

    fn poll_reconnect(&mut self, now: Instant) {
        match self.next_attempt_at {
            Some(at) if now < at => return,
            _ => {}
        }

        info!(
            "Reconnect attempt {} to {}",
            self.backoff.attempts(),
            self.addr
        );
        match Link::open(&self.addr) {
            Ok(link) => {
                self.link = Some(link);
                self.next_attempt_at = None;
                self.backoff.reset();
                self.liveness = Liveness::new(now);
                // The server may have restarted; accept whatever it sends next.
                self.state_version = None;
                self.transition(LinkState::Connected);
                info!("Reconnected to {}", self.addr);
            }
            Err(e) => {
                warn!("Reconnect to {} failed: {}", self.addr, e);
                self.schedule_reconnect(now);
            }
        }
    }

    fn link_lost(&mut self, now: Instant) {
        if let Some(link) = self.link.take() {
            link.close();
        }
        if self.state == LinkState::Disconnected {
            return;
        }
        self.schedule_reconnect(now);
    }

    fn schedule_reconnect(&mut self, now: Instant) {
        match self.backoff.next_delay() {
            Some(delay) => {
                self.next_attempt_at = Some(now + delay);
                self.transition(LinkState::Reconnecting);
                debug!("Next reconnect attempt in {:?}", delay);
            }
            None => {
                error!(
                    "Giving up on {} after {} reconnect attempts",
                    self.addr,
                    self.backoff.attempts()
                );
                self.next_attempt_at = None;
                self.transition(LinkState::Disconnected);
            }
        }
    }

    fn transition(&mut self, next: LinkState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            warn!("Ignoring link transition {:?} -> {:?}", self.state, next);
            return;
        }
        self.state = next;
        self.pending_events.push(ClientEvent::LinkStateChanged(next));
    }

    /// Close the link for good. No reconnect will be attempted.
    pub fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.next_attempt_at = None;
        self.transition(LinkState::Disconnected);
        info!("Disconnected from {}", self.addr);
    }
}

/// Background thread that reads frames from the server.
fn server_reader_thread(stream: TcpStream, update_tx: mpsc::Sender<ServerUpdate>) {
    let mut reader = BufReader::new(stream);

    loop {
        let update = match read_frame(&mut reader) {
            Ok(text) => match decode_frame(&text) {
                Ok(frame) => ServerUpdate::Frame(frame),
                Err(e) => ServerUpdate::Undecodable(e),
            },
            Err(e) => {
                if e.kind() != io::ErrorKind::UnexpectedEof {
                    debug!("Server read error: {}", e);
                }
                let _ = update_tx.send(ServerUpdate::Closed);
                break;
            }
        };

        if update_tx.send(update).is_err() {
            // Receiver dropped, client is shutting down
            break;
        }
    }

    debug!("Server reader thread exiting");
}
