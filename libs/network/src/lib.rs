//! # Port Network - Transports and Protocol Drivers
//!
//! ## Purpose
//!
//! Everything between a port and the wire: connection URIs, framed TCP
//! connections, the port-sharing listener registry, and the protocol drivers
//! that bind one codec to one transport.
//!
//! ## Architecture Role
//!
//! ```text
//! Proxy Port ──► ServiceDriver ──► codec ──► framed TCP ──┐
//!                                                         │  shared listener
//! Service Port ◄── ServiceSink ◄── ClientDriver ◄─────────┘  (path routing)
//! ```
//!
//! | Scheme    | Proxy driver          | Service binding                  |
//! |-----------|-----------------------|----------------------------------|
//! | `tcp`     | [`TcpServiceDriver`] + block codec    | shared TCP listener |
//! | `jsonrpc` | [`TcpServiceDriver`] + JSON-RPC codec | shared TCP listener |
//! | `local`   | [`LocalServiceDriver`]                | [`LocalEndpoints`]  |
//!
//! ## Process-Wide State
//!
//! The listener registry and the local endpoint table are singletons created
//! on first access. [`shutdown_all`] tears both down.

pub mod drivers;
pub mod error;
pub mod transports;
pub mod uri;

pub use drivers::{
    next_client_id, ClientDriver, DriverFactory, DriverOptions, DriverSink, DriverState,
    DriverStateCell, LocalEndpoints, LocalServiceDriver, ServiceBinding, ServiceDriver,
    ServiceSink, TcpServiceDriver,
};
pub use error::{Result, TransportError};
pub use transports::ListenerRegistry;
pub use uri::{ActorUri, Scheme};

/// Stop every shared listener and forget every local endpoint
pub fn shutdown_all() {
    ListenerRegistry::init().shutdown_all();
    LocalEndpoints::init().shutdown_all();
}
