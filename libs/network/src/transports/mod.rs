//! Transport Layer
//!
//! Framed TCP connections and the shared listeners that route them to
//! services by path. Everything above this module sees frames, never bytes
//! on a socket.

pub mod listener;
pub mod tcp;

pub use listener::{ConnectionAcceptor, ListenerRegistry};
pub use tcp::{FrameReader, FrameWriter};
