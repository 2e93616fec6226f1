//! Protocol Drivers
//!
//! ## Purpose
//!
//! A protocol driver is the per-connection adapter between the message model
//! and one wire format bound to one transport. Ports only ever see the two
//! capability sets defined here, so formats can be swapped without the port
//! or its correlation table noticing.
//!
//! - [`ServiceDriver`]: used by a Proxy Port to reach one service
//! - [`ClientDriver`]: used by a Service Port, one per connected peer
//!
//! Drivers report inbound traffic through sinks ([`DriverSink`] on the proxy
//! side, [`ServiceSink`] on the service side). Sink callbacks are invoked
//! sequentially per connection in arrival order and must not block.
//!
//! ## Driver State
//!
//! ```text
//! Connecting ──► Ok ──► Disconnected
//!      │          │
//!      └──────────┴───► Faulted (sticky until a new driver instance)
//! ```
//!
//! Driver instances are single-use: reconnecting always creates a new one.

use crate::uri::ActorUri;
use crate::{Result, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use port_types::{ClientId, Message};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub mod factory;
pub mod local;
pub mod tcp;

pub use factory::{DriverFactory, ServiceBinding};
pub use local::{LocalClientDriver, LocalEndpoints, LocalServiceDriver};
pub use tcp::{TcpClientDriver, TcpServiceDriver, TcpServiceHost};

static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique client id
pub fn next_client_id() -> ClientId {
    ClientId(CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Simplified connection state reported by drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverState {
    Connecting,
    Ok,
    Faulted,
    Disconnected,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverState::Connecting => "connecting",
            DriverState::Ok => "ok",
            DriverState::Faulted => "faulted",
            DriverState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Driver state with the sticky fault flag
#[derive(Debug)]
pub struct DriverStateCell {
    state: Mutex<DriverState>,
    faulted: AtomicBool,
}

impl Default for DriverStateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverStateCell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DriverState::Connecting),
            faulted: AtomicBool::new(false),
        }
    }

    pub fn get(&self) -> DriverState {
        if self.faulted.load(Ordering::Acquire) {
            DriverState::Faulted
        } else {
            *self.state.lock()
        }
    }

    /// Record a transport readiness change; ignored once faulted
    pub fn set(&self, state: DriverState) {
        if state == DriverState::Faulted {
            self.fault();
            return;
        }
        let mut current = self.state.lock();
        if !self.faulted.load(Ordering::Acquire) {
            *current = state;
        }
    }

    pub fn fault(&self) {
        self.faulted.store(true, Ordering::Release);
        *self.state.lock() = DriverState::Faulted;
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }
}

/// Connection and limit settings shared by all drivers
#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub max_frame_size: usize,
    pub connect_timeout: Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Proxy-side callbacks
pub trait DriverSink: Send + Sync {
    /// A decoded inbound message (Response, Error or Notification)
    fn on_message(&self, message: Message);

    /// The driver faulted; no further callbacks follow
    fn on_fault(&self, error: TransportError);

    /// The peer closed the connection; no further callbacks follow
    fn on_closed(&self);
}

/// Service-side callbacks
pub trait ServiceSink: Send + Sync {
    fn on_client_connected(&self, client: Arc<dyn ClientDriver>);

    /// A decoded inbound message, already tagged with its client id
    fn on_client_message(&self, client: ClientId, message: Message);

    fn on_client_disconnected(&self, client: ClientId);
}

/// Driver-to-Service capability set
#[async_trait]
pub trait ServiceDriver: Send + Sync {
    /// Open the connection and start delivering inbound traffic to `sink`
    async fn open(&self, target: &ActorUri, sink: Arc<dyn DriverSink>) -> Result<()>;

    /// Send a Request or Notification
    async fn send_request(&self, message: Message) -> Result<()>;

    /// Release the connection; idempotent and never fails
    async fn dispose(&self);

    fn connection_state(&self) -> DriverState;

    /// Short format name used in logs
    fn format_name(&self) -> &'static str;
}

/// Driver-to-Client capability set
#[async_trait]
pub trait ClientDriver: Send + Sync {
    fn client_id(&self) -> ClientId;

    /// Peer description for logs
    fn peer(&self) -> String;

    async fn send_to_client(&self, message: Message) -> Result<()>;

    /// Close this peer's connection; idempotent
    async fn disconnect_from_client(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_is_sticky() {
        let cell = DriverStateCell::new();
        assert_eq!(cell.get(), DriverState::Connecting);
        cell.set(DriverState::Ok);
        assert_eq!(cell.get(), DriverState::Ok);

        cell.fault();
        cell.set(DriverState::Ok);
        cell.set(DriverState::Disconnected);
        assert_eq!(cell.get(), DriverState::Faulted);
    }

    #[test]
    fn test_client_ids_unique() {
        let a = next_client_id();
        let b = next_client_id();
        assert_ne!(a, b);
    }
}
