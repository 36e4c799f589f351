//! Message value <-> wire text.
//!
//! Decoding always runs full catalog validation: syntactically valid JSON that
//! fails the catalog is rejected whole, never partially accepted.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use pianosync_types::{validate, ErrorCode, Message, ValidationError};

use crate::protocol::{BatchFrame, ErrorFrame, OutboundFrame, PerformanceMetrics};

/// Why a wire frame could not be turned into a message.
#[derive(Debug)]
pub enum DecodeError {
    /// Not valid JSON.
    Parse(serde_json::Error),
    /// Valid JSON that failed the catalog.
    Validation {
        error: ValidationError,
        payload: Value,
    },
}

impl DecodeError {
    /// `PARSE_ERROR` or `VALIDATION_ERROR`.
    pub fn code(&self) -> ErrorCode {
        match self {
            DecodeError::Parse(_) => ErrorCode::ParseError,
            DecodeError::Validation { .. } => ErrorCode::ValidationError,
        }
    }

    /// The most specific code: the catalog's own code for validation failures.
    pub fn detail_code(&self) -> ErrorCode {
        match self {
            DecodeError::Parse(_) => ErrorCode::ParseError,
            DecodeError::Validation { error, .. } => error.code,
        }
    }

    /// Error frame reporting this failure back to the sender.
    pub fn to_error_frame(&self) -> ErrorFrame {
        match self {
            DecodeError::Parse(e) => ErrorFrame::new(ErrorCode::ParseError, e.to_string(), None),
            DecodeError::Validation { error, payload } => {
                ErrorFrame::new(error.code, error.message.clone(), Some(payload.clone()))
            }
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Parse(e) => write!(f, "PARSE_ERROR: {}", e),
            DecodeError::Validation { error, .. } => write!(f, "VALIDATION_ERROR: {}", error),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Parse(e) => Some(e),
            DecodeError::Validation { error, .. } => Some(error),
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::Parse(e)
    }
}

/// Serialize a catalog message. Deterministic; field order follows the type definitions.
pub fn serialize(msg: &Message) -> serde_json::Result<String> {
    serde_json::to_string(msg)
}

/// Parse and validate one wire frame.
pub fn deserialize(text: &str) -> Result<Message, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    validate_value(value)
}

/// Like [`deserialize`], but fills in a missing `timestamp` with the receipt
/// time and a missing `source` with `client`. Present-but-invalid header
/// fields are still rejected.
pub fn deserialize_inbound(text: &str, received_at: u64) -> Result<Message, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    let mut stamped = value.clone();
    if let Value::Object(obj) = &mut stamped {
        obj.entry("timestamp").or_insert_with(|| Value::from(received_at));
        obj.entry("source").or_insert_with(|| Value::from("client"));
    }
    validate(&stamped).map_err(|error| DecodeError::Validation {
        error,
        payload: value,
    })
}

fn validate_value(value: Value) -> Result<Message, DecodeError> {
    match validate(&value) {
        Ok(msg) => Ok(msg),
        Err(error) => Err(DecodeError::Validation {
            error,
            payload: value,
        }),
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Tagged<'a> {
    Batch(&'a BatchFrame),
    Error(&'a ErrorFrame),
    PerformanceMetrics(&'a PerformanceMetrics),
}

/// Serialize any server-to-client frame.
pub fn encode_frame(frame: &OutboundFrame) -> serde_json::Result<String> {
    match frame {
        OutboundFrame::Message(m) => serialize(m),
        OutboundFrame::Batch(b) => serde_json::to_string(&Tagged::Batch(b)),
        OutboundFrame::Error(e) => serde_json::to_string(&Tagged::Error(e)),
        OutboundFrame::PerformanceMetrics(p) => {
            serde_json::to_string(&Tagged::PerformanceMetrics(p))
        }
    }
}

/// Decode a server-to-client frame. Messages inside batches are validated
/// individually; one bad entry rejects the whole batch.
pub fn decode_frame(text: &str) -> Result<OutboundFrame, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    let tag = value.get("type").and_then(Value::as_str).unwrap_or_default();
    match tag {
        "batch" => {
            let timestamp = value.get("timestamp").and_then(Value::as_u64);
            let entries = value.get("messages").and_then(Value::as_array);
            let (Some(timestamp), Some(entries)) = (timestamp, entries) else {
                return Err(DecodeError::Validation {
                    error: ValidationError::new(
                        ErrorCode::Malformed,
                        "batch requires timestamp and messages",
                    ),
                    payload: value,
                });
            };
            let mut messages = Vec::with_capacity(entries.len());
            for entry in entries {
                let msg = validate(entry).map_err(|error| DecodeError::Validation {
                    error,
                    payload: entry.clone(),
                })?;
                messages.push(msg);
            }
            Ok(OutboundFrame::Batch(BatchFrame {
                timestamp,
                messages,
            }))
        }
        "error" => from_tagged(value).map(OutboundFrame::Error),
        "performance_metrics" => from_tagged(value).map(OutboundFrame::PerformanceMetrics),
        _ => validate_value(value).map(OutboundFrame::Message),
    }
}

fn from_tagged<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, DecodeError> {
    serde_json::from_value(value.clone()).map_err(|e| DecodeError::Validation {
        error: ValidationError::new(ErrorCode::Malformed, e.to_string()),
        payload: value,
    })
}
