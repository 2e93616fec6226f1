//! # Port Codec - Wire Format Rules
//!
//! ## Purpose
//!
//! The "rules" layer between the message model and the transports. Each
//! codec owns exactly one wire format's encode/decode rules:
//! - [`BlockCodec`]: length-prefixed, type-tagged binary blocks with a
//!   CRC32 trailer and implicit field order
//! - [`JsonRpcCodec`]: JSON-RPC 2.0 text dialect, with notifications mapped
//!   to calls without an id
//!
//! Both implement [`WireCodec`], so drivers and ports never know which
//! format is in use.
//!
//! ## Decode Failure Contract
//!
//! A failed decode returns [`DecodeError`]. When the frame got far enough to
//! reveal a request id, [`DecodeError::request_id`] is set and the driver
//! answers that id with an Error message instead of faulting the connection.
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → [codec] → libs/network
//!     ↑           ↓            ↓
//! Message     Frames       Sockets
//! Payload     Checksums    Drivers
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Socket management or connection handling (belongs in `port-network`)
//! - Payload field layouts (declared by each payload type)

pub mod block;
pub mod error;
pub mod jsonrpc;
pub mod registry;
pub mod wire;

pub use block::BlockCodec;
pub use error::{CodecError, CodecResult, DecodeError};
pub use jsonrpc::JsonRpcCodec;
pub use registry::BlockTypeRegistry;
pub use wire::{WireCodec, WireFormat};
