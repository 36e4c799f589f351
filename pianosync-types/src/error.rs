//! Error taxonomy shared by the catalog, the serializer and the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Machine-readable error code, carried in `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Wrong shape or missing field.
    Malformed,
    /// MIDI number or velocity outside 0..=127, or non-integral.
    OutOfRange,
    /// Unrecognized `type` tag.
    UnknownType,
    /// Invalid wire syntax.
    ParseError,
    /// Well-formed JSON that failed catalog validation.
    ValidationError,
    /// Per-connection token bucket exhausted.
    RateLimited,
    /// Transport closed or liveness check failed.
    ConnectionLost,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Malformed => "MALFORMED",
            ErrorCode::OutOfRange => "OUT_OF_RANGE",
            ErrorCode::UnknownType => "UNKNOWN_TYPE",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::ConnectionLost => "CONNECTION_LOST",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate message failed the catalog's field contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub code: ErrorCode,
    pub message: String,
}

impl ValidationError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Malformed, message)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}
