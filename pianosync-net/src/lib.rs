//! Network layer for the shared piano state.
//!
//! A single [`Dispatcher`] owns the active note store and the connection
//! registry; [`NetServer`] feeds it from TCP sockets and [`PianoClient`]
//! mirrors its snapshots on the other end.

pub mod client;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod framing;
pub mod protocol;
pub mod registry;
pub mod reliability;
pub mod server;
pub mod store;

pub use client::{ClientError, ClientEvent, PianoClient};
pub use codec::{decode_frame, deserialize, deserialize_inbound, encode_frame, serialize, DecodeError};
pub use config::{BatchingConfig, NetConfig, QueueConfig, RateLimitConfig, ReliabilityConfig};
pub use dispatcher::{Dispatcher, InboundOutcome, TickReport};
pub use protocol::{BatchFrame, ConnectionId, ErrorFrame, OutboundFrame, PerformanceMetrics};
pub use registry::{Connection, ConnectionRegistry};
pub use reliability::LinkState;
pub use server::NetServer;
pub use store::ActiveNoteStore;
