//! Payload and block errors, plus the wire-level error descriptor
//!
//! [`RemoteError`] is what travels inside Error messages. Its [`ErrorCode`]
//! is wire-stable so every driver can carry it losslessly.

use crate::block::{block_types, BlockReader, BlockWriter};
use crate::payload::PayloadType;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while writing or reading block fields
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BlockError {
    #[error("Truncated block field '{field}': need {need} bytes, got {got} (offset {offset})")]
    Truncated {
        field: &'static str,
        need: usize,
        got: usize,
        offset: usize,
    },

    #[error("Field '{field}' is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("Invalid value for field '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Field '{field}' too long: {len} exceeds maximum {max}")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("Block has {remaining} unread trailing bytes")]
    TrailingBytes { remaining: usize },

    #[error("Block type mismatch: expected {expected:#06x}, got {actual:#06x}")]
    TypeMismatch { expected: u16, actual: u16 },

    #[error("Payload type '{type_name}' has no block encoding")]
    Unsupported { type_name: &'static str },
}

/// Errors raised while converting a payload between its forms
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Failed to serialize '{type_name}' to a tree: {source}")]
    Serialize {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Block encoding failed: {0}")]
    Block(#[from] BlockError),

    #[error("Payload in {form} form cannot be re-encoded as {target}")]
    FormMismatch {
        form: &'static str,
        target: &'static str,
    },
}

/// Wire-stable error classification carried by Error messages
///
/// Application codes must use values from [`ErrorCode::APPLICATION_MIN`]
/// upwards so they never collide with framework codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum ErrorCode {
    /// No handler on the service matched the message
    NotImplemented,
    /// A handler returned an error or panicked
    UnhandledException,
    /// The inbound message could not be decoded
    DecodeFailure,
    /// The payload could not be read as the handler's expected type
    TypeMismatch,
    /// The connection closed before an answer arrived
    ConnectionClosed,
    /// The service is shutting down or not accepting requests
    ServiceUnavailable,
    /// Application-defined code
    Application(u16),
}

impl ErrorCode {
    pub const APPLICATION_MIN: u16 = 100;

    pub fn as_u16(self) -> u16 {
        match self {
            ErrorCode::NotImplemented => 1,
            ErrorCode::UnhandledException => 2,
            ErrorCode::DecodeFailure => 3,
            ErrorCode::TypeMismatch => 4,
            ErrorCode::ConnectionClosed => 5,
            ErrorCode::ServiceUnavailable => 6,
            ErrorCode::Application(code) => code,
        }
    }
}

impl From<u16> for ErrorCode {
    fn from(code: u16) -> Self {
        match code {
            1 => ErrorCode::NotImplemented,
            2 => ErrorCode::UnhandledException,
            3 => ErrorCode::DecodeFailure,
            4 => ErrorCode::TypeMismatch,
            5 => ErrorCode::ConnectionClosed,
            6 => ErrorCode::ServiceUnavailable,
            other => ErrorCode::Application(other),
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        code.as_u16()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::NotImplemented => write!(f, "not implemented on service"),
            ErrorCode::UnhandledException => write!(f, "unhandled exception"),
            ErrorCode::DecodeFailure => write!(f, "decode failure"),
            ErrorCode::TypeMismatch => write!(f, "type mismatch"),
            ErrorCode::ConnectionClosed => write!(f, "connection closed"),
            ErrorCode::ServiceUnavailable => write!(f, "service unavailable"),
            ErrorCode::Application(code) => write!(f, "application error {code}"),
        }
    }
}

/// Error descriptor carried as the payload of Error messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct RemoteError {
    pub code: ErrorCode,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_implemented(what: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::NotImplemented,
            format!("'{what}' is not implemented on service"),
        )
    }

    pub fn unhandled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnhandledException, message)
    }

    pub fn decode_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DecodeFailure, message)
    }
}

impl PayloadType for RemoteError {
    const TYPE_NAME: &'static str = "RemoteError";
    const BLOCK_TYPE: Option<u16> = Some(block_types::REMOTE_ERROR);

    fn write_block(&self, w: &mut BlockWriter) -> Result<(), BlockError> {
        w.write_u16(self.code.as_u16());
        w.write_str("message", &self.message)
    }

    fn read_block(r: &mut BlockReader<'_>) -> Result<Self, BlockError> {
        let code = ErrorCode::from(r.read_u16("code")?);
        let message = r.read_str("message")?;
        Ok(Self { code, message })
    }
}
