//! # Port Types - Message Model and Serialization Payloads
//!
//! ## Purpose
//!
//! Pure data layer shared by every other crate in the workspace:
//! - The protocol-independent [`Message`] shape (`type`, `request_id`,
//!   `destination_method`, `payload`) that every wire driver must preserve
//! - The deferred [`Payload`] abstraction: a received value stays in its
//!   intermediate form (JSON tree, raw block, or in-process object) until a
//!   consumer asks for a concrete type with [`Payload::try_read_as`]
//! - The [`PayloadType`] contract application types implement to travel
//!   through ports, including explicit field order for the block format
//! - Block field primitives ([`BlockWriter`], [`BlockReader`])
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → libs/codec → libs/network → libs/actors → services/catalog
//!     ↑            ↓             ↓              ↓
//! Pure Data    Wire Rules    Drivers       Ports, FSM,
//! Message      Block/JSON    Transports    Correlation
//! Payload      Frames        Listeners     Dispatch
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Frame layout or checksums (belongs in `port-codec`)
//! - Sockets, listeners or drivers (belongs in `port-network`)

pub mod block;
pub mod error;
pub mod message;
pub mod payload;

pub use block::{block_types, BlockReader, BlockWriter, RawBlock};
pub use error::{BlockError, ErrorCode, PayloadError, RemoteError};
pub use message::{ClientId, Message, MessageType, RequestId, ServiceShutdown, NOTIFICATION_ID};
pub use payload::{ErasedPayload, NativeForm, Payload, PayloadType};
