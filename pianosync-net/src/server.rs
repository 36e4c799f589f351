//! TCP transport for the dispatcher.
//!
//! Accepts client connections, reads frames on one thread per client, and
//! funnels them through a channel into the single dispatcher. All state
//! mutation and all socket writes happen on the thread that drives `pump`.

use std::collections::HashMap;
use std::io::{self, BufReader, BufWriter, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::codec::encode_frame;
use crate::config::NetConfig;
use crate::dispatcher::{Dispatcher, InboundOutcome};
use crate::framing::{read_frame, write_frame};
use crate::protocol::ConnectionId;

/// A stuck peer must not stall the dispatch loop for longer than this.
const WRITE_TIMEOUT: Duration = Duration::from_millis(250);

/// Idle sleep between pump iterations in `run`.
const IDLE_SLEEP: Duration = Duration::from_millis(2);

/// What a reader thread reports.
enum InboundEvent {
    Frame(String),
    Closed,
}

/// Network server that owns the dispatcher and the sockets.
pub struct NetServer {
    listener: TcpListener,
    dispatcher: Dispatcher,
    writers: HashMap<ConnectionId, BufWriter<TcpStream>>,
    inbound_rx: Receiver<(ConnectionId, InboundEvent)>,
    inbound_tx: Sender<(ConnectionId, InboundEvent)>,
}

impl NetServer {
    /// Bind the server to an address.
    pub fn bind(addr: &str, config: NetConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;

        let (inbound_tx, inbound_rx) = mpsc::channel();

        info!("NetServer listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            dispatcher: Dispatcher::new(config, Instant::now()),
            writers: HashMap::new(),
            inbound_rx,
            inbound_tx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Number of registered connections.
    pub fn client_count(&self) -> usize {
        self.dispatcher.registry().len()
    }

    /// Accept any pending TCP connections. Each one is registered and sent
    /// the current snapshot right away.
    pub fn accept_connections(&mut self, now: Instant) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = self.admit(stream, now) {
                        error!("Failed to set up connection from {}: {}", addr, e);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("Accept error: {}", e);
                    break;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, now: Instant) -> io::Result<()> {
        let addr = stream.peer_addr()?;
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        let read_stream = stream.try_clone()?;

        let id = self.dispatcher.connect(now);
        self.writers.insert(id, BufWriter::new(stream));

        let inbound_tx = self.inbound_tx.clone();
        thread::spawn(move || {
            client_reader_thread(id, read_stream, inbound_tx);
        });

        info!("{} connected from {}", id, addr);
        Ok(())
    }

    /// Hand every frame received so far to the dispatcher.
    /// Returns the number of frames processed.
    pub fn poll_inbound(&mut self, now: Instant) -> usize {
        let mut processed = 0;
        while let Ok((id, event)) = self.inbound_rx.try_recv() {
            match event {
                InboundEvent::Frame(text) => {
                    processed += 1;
                    if self.dispatcher.handle_inbound(id, &text, now)
                        == InboundOutcome::UnknownConnection
                    {
                        self.close(id);
                    }
                }
                InboundEvent::Closed => {
                    self.dispatcher.disconnect(id);
                    self.writers.remove(&id);
                }
            }
        }
        processed
    }

    /// Run timers and close any connection the sweep removed.
    pub fn tick(&mut self, now: Instant) {
        let report = self.dispatcher.tick(now);
        for id in report.swept {
            self.close(id);
        }
    }

    /// Write every ready frame to its socket. A failed write drops the
    /// connection.
    pub fn flush_writes(&mut self) {
        let mut failed = Vec::new();

        for (&id, writer) in self.writers.iter_mut() {
            let frames = self.dispatcher.drain_ready(id);
            if frames.is_empty() {
                continue;
            }
            let result = frames
                .iter()
                .try_for_each(|frame| write_frame(writer, &encode_frame(frame)?))
                .and_then(|_| writer.flush());
            if let Err(e) = result {
                warn!("Failed to send to {}: {}", id, e);
                failed.push(id);
            }
        }

        for id in failed {
            self.close(id);
        }
    }

    /// One full iteration: accept, read, run timers, write.
    pub fn pump(&mut self, now: Instant) -> usize {
        self.accept_connections(now);
        let processed = self.poll_inbound(now);
        self.tick(now);
        self.flush_writes();
        processed
    }

    /// Drive the server until `shutdown` is set.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::Relaxed) {
            if self.pump(Instant::now()) == 0 {
                thread::sleep(IDLE_SLEEP);
            }
        }
        self.shutdown();
    }

    /// Flush everything still pending and close every socket.
    pub fn shutdown(&mut self) {
        info!("NetServer shutting down, {} connection(s)", self.writers.len());
        self.dispatcher.flush_all();
        self.flush_writes();
        let ids: Vec<ConnectionId> = self.writers.keys().copied().collect();
        for id in ids {
            self.close(id);
        }
    }

    fn close(&mut self, id: ConnectionId) {
        self.dispatcher.disconnect(id);
        if let Some(writer) = self.writers.remove(&id) {
            // Unblocks the reader thread.
            let _ = writer.get_ref().shutdown(Shutdown::Both);
            debug!("{} socket closed", id);
        }
    }
}

/// Background thread that reads frames from a client and sends them to the
/// inbound channel.
fn client_reader_thread(
    id: ConnectionId,
    stream: TcpStream,
    inbound_tx: Sender<(ConnectionId, InboundEvent)>,
) {
    let mut reader = BufReader::new(stream);

    loop {
        match read_frame(&mut reader) {
            Ok(text) => {
                if inbound_tx.send((id, InboundEvent::Frame(text))).is_err() {
                    // Receiver dropped, server is shutting down
                    break;
                }
            }
            Err(e) => {
                if e.kind() != io::ErrorKind::UnexpectedEof {
                    warn!("{} read error: {}", id, e);
                }
                let _ = inbound_tx.send((id, InboundEvent::Closed));
                break;
            }
        }
    }

    debug!("{} reader thread exiting", id);
}
