//! Wire codec abstraction

use crate::block::BlockCodec;
use crate::error::{CodecResult, DecodeError};
use crate::jsonrpc::JsonRpcCodec;
use bytes::Bytes;
use port_types::Message;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Encode/decode rules for one wire format
///
/// Implementations must preserve `message_type`, `request_id` and
/// `destination_method` losslessly and must never bind the payload to a
/// concrete application type while decoding.
pub trait WireCodec: Send + Sync + fmt::Debug {
    /// Short format name used in logs
    fn name(&self) -> &'static str;

    fn encode(&self, message: &Message) -> CodecResult<Bytes>;

    fn decode(&self, frame: &[u8]) -> Result<Message, DecodeError>;
}

/// Available wire formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    Block,
    JsonRpc,
}

impl WireFormat {
    pub fn codec(self) -> Arc<dyn WireCodec> {
        match self {
            WireFormat::Block => Arc::new(BlockCodec::new()),
            WireFormat::JsonRpc => Arc::new(JsonRpcCodec::new()),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Block => write!(f, "block"),
            WireFormat::JsonRpc => write!(f, "jsonrpc"),
        }
    }
}
