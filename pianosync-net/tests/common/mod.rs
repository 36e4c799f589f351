#![allow(dead_code)]
//! Test harness utilities for pianosync-net integration tests.

use std::collections::VecDeque;
use std::io::{BufReader, BufWriter, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use pianosync_net::codec::{decode_frame, serialize};
use pianosync_net::config::{BatchingConfig, NetConfig, ReliabilityConfig};
use pianosync_net::framing::{read_frame, write_frame};
use pianosync_net::protocol::{ErrorFrame, OutboundFrame};
use pianosync_net::server::NetServer;
use pianosync_types::{Message, MessageBody, StateSync};

/// Config that sends every message as soon as it is enqueued.
pub fn unbatched_config() -> NetConfig {
    NetConfig {
        batching: BatchingConfig {
            max_batch_size: 1,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Unbatched config with a short heartbeat interval.
pub fn fast_heartbeat_config(interval: Duration) -> NetConfig {
    NetConfig {
        reliability: ReliabilityConfig {
            heartbeat_interval: interval,
            ..Default::default()
        },
        ..unbatched_config()
    }
}

/// Drive the server (accept + poll + timers + writes) until the expected
/// client count is reached, or timeout.
pub fn drive_until_clients(server: &mut NetServer, expected: usize, timeout: Duration) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        server.pump(Instant::now());
        if server.client_count() >= expected {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!(
        "Timed out waiting for {} clients (have {})",
        expected,
        server.client_count()
    );
}

/// Poll inbound frames with a fixed `now` until `expected` frames have been
/// handed to the dispatcher, or timeout.
pub fn poll_frames_at(server: &mut NetServer, now: Instant, expected: usize, timeout: Duration) {
    let start = Instant::now();
    let mut processed = 0;
    while start.elapsed() < timeout {
        processed += server.poll_inbound(now);
        if processed >= expected {
            return;
        }
        thread::sleep(Duration::from_millis(2));
    }
    panic!("Timed out waiting for {} frames (got {})", expected, processed);
}

/// A server running `run` on its own thread.
pub struct TestServer {
    pub addr: String,
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<NetServer>,
}

impl TestServer {
    pub fn start(bind: &str, config: NetConfig) -> Self {
        let mut server = NetServer::bind(bind, config).unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let handle = thread::spawn(move || {
            server.run(&flag);
            server
        });
        Self {
            addr,
            shutdown,
            handle,
        }
    }

    /// Stop the loop and hand back the server for inspection.
    pub fn stop(self) -> NetServer {
        self.shutdown.store(true, Ordering::Relaxed);
        self.handle.join().unwrap()
    }
}

/// A raw TCP client for protocol-level tests. Batches are unpacked so
/// callers see one message at a time.
pub struct RawClient {
    pub reader: BufReader<TcpStream>,
    pub writer: BufWriter<TcpStream>,
    inbox: VecDeque<OutboundFrame>,
}

impl RawClient {
    /// Connect to a server via TCP.
    pub fn connect(addr: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        let read_stream = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(stream),
            inbox: VecDeque::new(),
        })
    }

    /// Send raw text as one frame.
    pub fn send_text(&mut self, text: &str) -> std::io::Result<()> {
        write_frame(&mut self.writer, text)?;
        self.writer.flush()
    }

    pub fn send(&mut self, msg: &Message) -> std::io::Result<()> {
        self.send_text(&serialize(msg)?)
    }

    /// Receive the next frame, with batches flattened into messages.
    pub fn recv(&mut self) -> std::io::Result<OutboundFrame> {
        while self.inbox.is_empty() {
            let text = read_frame(&mut self.reader)?;
            match decode_frame(&text) {
                Ok(OutboundFrame::Batch(batch)) => self
                    .inbox
                    .extend(batch.messages.into_iter().map(OutboundFrame::Message)),
                Ok(frame) => self.inbox.push_back(frame),
                Err(e) => panic!("server sent undecodable frame {}: {}", text, e),
            }
        }
        Ok(self.inbox.pop_front().unwrap())
    }

    /// Receive until a snapshot arrives, returning it and everything before it.
    pub fn recv_state_sync(&mut self) -> (StateSync, Vec<OutboundFrame>) {
        let mut before = Vec::new();
        loop {
            match self.recv().unwrap() {
                OutboundFrame::Message(Message {
                    body: MessageBody::StateSync(sync),
                    ..
                }) => return (sync, before),
                other => before.push(other),
            }
        }
    }

    /// Receive snapshots until one reaches `version`.
    pub fn recv_until_version(&mut self, version: u64) -> (StateSync, Vec<OutboundFrame>) {
        let mut seen = Vec::new();
        loop {
            let (sync, before) = self.recv_state_sync();
            seen.extend(before);
            if sync.state_version >= version {
                return (sync, seen);
            }
        }
    }

    /// Receive until an error frame arrives.
    pub fn recv_error(&mut self) -> ErrorFrame {
        loop {
            if let OutboundFrame::Error(e) = self.recv().unwrap() {
                return e;
            }
        }
    }
}

/// Build a `note_on` frame the way a minimal client would.
pub fn note_on_json(midi: i64, velocity: i64) -> String {
    format!(
        r#"{{"type":"note_on","timestamp":1,"source":"client","midiNumber":{},"velocity":{}}}"#,
        midi, velocity
    )
}

/// `(midiNumber, velocity)` pairs from a snapshot.
pub fn notes(sync: &StateSync) -> Vec<(u8, u8)> {
    sync.active_notes
        .iter()
        .map(|n| (n.midi_number, n.velocity))
        .collect()
}
