//! Port error types
//!
//! Callers of a port always get either a typed payload or one of these
//! errors. Raw transport failures are wrapped, never passed through bare.

use crate::lifecycle::PortState;
use port_network::TransportError;
use port_types::{ErrorCode, RemoteError};
use thiserror::Error;

/// Result type for port operations
pub type Result<T> = std::result::Result<T, PortError>;

#[derive(Debug, Error, Clone)]
pub enum PortError {
    #[error("Port has no link target")]
    NotLinked,

    #[error("Port is not connected (state: {state})")]
    NotConnected { state: PortState },

    #[error("Send queue full ({depth} messages waiting for connection)")]
    QueueFull { depth: usize },

    #[error("Connection closed before an answer arrived")]
    ConnectionClosed,

    #[error("Failed to connect to {uri}: {reason}")]
    Connect { uri: String, reason: String },

    #[error("Remote error: {0}")]
    Remote(RemoteError),

    #[error("Type mismatch: expected '{expected}', received '{actual}'")]
    TypeMismatch { expected: String, actual: String },

    #[error("Request exceeded its allowed age ({age_ms}ms)")]
    TimedOut { age_ms: u64 },

    #[error("Port has been disposed")]
    Disposed,

    #[error("Port is already open")]
    AlreadyOpen,

    #[error("Invalid port operation: {0}")]
    Misuse(String),

    #[error("No service published under name '{0}'")]
    NameNotFound(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl PortError {
    pub fn connect(uri: impl ToString, reason: impl ToString) -> Self {
        PortError::Connect {
            uri: uri.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        PortError::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn misuse(message: impl Into<String>) -> Self {
        PortError::Misuse(message.into())
    }

    /// Whether this is a programming error rather than a runtime condition
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            PortError::Disposed | PortError::AlreadyOpen | PortError::Misuse(_)
        )
    }

    /// Wire error code of a remote failure
    pub fn remote_code(&self) -> Option<ErrorCode> {
        match self {
            PortError::Remote(err) => Some(err.code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_misuse_classification() {
        assert!(PortError::Disposed.is_misuse());
        assert!(PortError::misuse("double open").is_misuse());
        assert!(!PortError::ConnectionClosed.is_misuse());
        assert!(!PortError::connect("tcp://h:1/a", "refused").is_misuse());
    }

    #[test]
    fn test_remote_code_exposed() {
        let err = PortError::Remote(RemoteError::not_implemented("Ping"));
        assert_eq!(err.remote_code(), Some(ErrorCode::NotImplemented));
        assert_eq!(PortError::NotLinked.remote_code(), None);
    }

    #[test]
    fn test_transport_errors_wrap() {
        let err: PortError = TransportError::closed("gone").into();
        assert!(matches!(err, PortError::Transport(_)));
    }
}
