//! Server-to-client frame types.
//!
//! Clients only ever send catalog [`Message`]s. The server additionally emits
//! batches, error reports and performance warnings; those never enter the
//! catalog and are never accepted inbound.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use pianosync_types::{now_millis, ErrorCode, Message};

/// Unique identifier for an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Several messages flushed together, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFrame {
    pub timestamp: u64,
    pub messages: Vec<Message>,
}

/// Rejection of one inbound frame, sent only to its sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub timestamp: u64,
    pub code: ErrorCode,
    pub message: String,
    /// The offending payload, when it parsed as JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ErrorFrame {
    pub fn new(code: ErrorCode, message: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            timestamp: now_millis(),
            code,
            message: message.into(),
            payload,
        }
    }
}

/// Degradation warning: the connection's queue overflowed and messages were dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub timestamp: u64,
    pub connection_id: ConnectionId,
    pub queue_depth: usize,
    pub dropped_messages: u64,
}

/// Anything the server writes to a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Message(Message),
    Batch(BatchFrame),
    Error(ErrorFrame),
    PerformanceMetrics(PerformanceMetrics),
}

impl OutboundFrame {
    /// Error reports and degradation warnings always skip batching.
    pub fn priority(&self) -> u8 {
        match self {
            OutboundFrame::Message(m) => m.priority(),
            OutboundFrame::Batch(_) => 0,
            OutboundFrame::Error(_) | OutboundFrame::PerformanceMetrics(_) => u8::MAX,
        }
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            OutboundFrame::Message(m) => m.type_tag(),
            OutboundFrame::Batch(_) => "batch",
            OutboundFrame::Error(_) => "error",
            OutboundFrame::PerformanceMetrics(_) => "performance_metrics",
        }
    }
}

impl From<Message> for OutboundFrame {
    fn from(msg: Message) -> Self {
        OutboundFrame::Message(msg)
    }
}

impl From<ErrorFrame> for OutboundFrame {
    fn from(err: ErrorFrame) -> Self {
        OutboundFrame::Error(err)
    }
}
