//! Codec errors
//!
//! Encode failures are local programming or payload problems. Decode
//! failures carry whatever identity could be recovered from the frame so the
//! driver can answer the sender instead of dropping the connection.

use port_types::{BlockError, MessageType, PayloadError, RequestId};
use thiserror::Error;

/// Errors raised while encoding a message or registering block types
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("Block error: {0}")]
    Block(#[from] BlockError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Block type {block_type:#06x} already registered for '{existing}', cannot register '{requested}'")]
    DuplicateBlockType {
        block_type: u16,
        existing: String,
        requested: String,
    },

    #[error("Block type {block_type:#06x} for '{type_name}' is in the reserved range")]
    ReservedBlockType { block_type: u16, type_name: String },
}

/// Result type for codec operations
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// A frame that could not be decoded
///
/// `request_id` is only set when the frame revealed a non-zero id; in that
/// case the failure is recoverable and the sender can be answered.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Decode failed at byte {offset}: {reason} (request id: {request_id:?})")]
pub struct DecodeError {
    pub request_id: Option<RequestId>,
    pub message_type: Option<MessageType>,
    pub offset: usize,
    pub reason: String,
}

impl DecodeError {
    /// Failure before any identity could be read
    pub fn unrecoverable(offset: usize, reason: impl Into<String>) -> Self {
        Self {
            request_id: None,
            message_type: None,
            offset,
            reason: reason.into(),
        }
    }

    /// Failure after the envelope revealed the message identity
    pub fn recoverable(
        request_id: RequestId,
        message_type: Option<MessageType>,
        offset: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            request_id: (request_id != 0).then_some(request_id),
            message_type,
            offset,
            reason: reason.into(),
        }
    }

    /// Create a checksum mismatch error with a likely-cause hint
    pub fn checksum_mismatch(
        request_id: RequestId,
        message_type: Option<MessageType>,
        expected: u32,
        calculated: u32,
        offset: usize,
    ) -> Self {
        let likely_cause = if expected == 0 {
            "frame written without checksum"
        } else {
            "data corruption during transmission"
        };
        Self::recoverable(
            request_id,
            message_type,
            offset,
            format!(
                "checksum mismatch: expected {expected:#010x}, calculated {calculated:#010x} ({likely_cause})"
            ),
        )
    }

    pub fn is_recoverable(&self) -> bool {
        self.request_id.is_some()
    }
}
