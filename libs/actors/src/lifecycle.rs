//! Connection Lifecycle State Machine
//!
//! ```text
//!             link (records target only)
//!   Unlinked ─────────────────────────────► Unlinked
//!       │ connect / open
//!       ▼
//!   Connecting ──────► Ok ──────────────┐
//!       │               │               │ disconnect
//!       │ I/O error     │ I/O error     ▼
//!       └──────► Faulted ◄──────   Disconnected
//!                   │                    │
//!                   └─ connect ──► Connecting ◄── connect
//! ```
//!
//! The state lives in a `watch` channel so callers can await transitions.
//! Disposal is a separate, permanent flag: a disposed port rejects every
//! further open or connect as misuse.

use crate::error::{PortError, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortState {
    Unlinked,
    Connecting,
    Ok,
    Faulted,
    Disconnected,
}

impl PortState {
    /// Whether `self → to` is a legal transition
    pub fn can_transition(self, to: PortState) -> bool {
        use PortState::*;
        matches!(
            (self, to),
            (Unlinked, Connecting)
                | (Connecting, Ok)
                | (Connecting, Faulted)
                | (Connecting, Disconnected)
                | (Ok, Faulted)
                | (Ok, Disconnected)
                | (Faulted, Connecting)
                | (Faulted, Disconnected)
                | (Disconnected, Connecting)
        )
    }

    pub fn is_connected(self) -> bool {
        self == PortState::Ok
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortState::Unlinked => "unlinked",
            PortState::Connecting => "connecting",
            PortState::Ok => "ok",
            PortState::Faulted => "faulted",
            PortState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Observable port state plus the last recorded fault
pub struct Lifecycle {
    port: String,
    state: watch::Sender<PortState>,
    last_error: Mutex<Option<String>>,
    disposed: AtomicBool,
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("port", &self.port)
            .field("state", &self.state())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Lifecycle {
    pub fn new(port: impl Into<String>) -> Self {
        let (state, _) = watch::channel(PortState::Unlinked);
        Self {
            port: port.into(),
            state,
            last_error: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> PortState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PortState> {
        self.state.subscribe()
    }

    /// Move to `to`, returning the previous state
    pub fn transition(&self, to: PortState) -> Result<PortState> {
        let mut previous = PortState::Unlinked;
        let mut allowed = false;
        self.state.send_if_modified(|current| {
            previous = *current;
            allowed = current.can_transition(to);
            if allowed {
                *current = to;
            }
            allowed
        });

        if !allowed {
            return Err(PortError::misuse(format!(
                "port '{}' cannot go from {previous} to {to}",
                self.port
            )));
        }
        if to == PortState::Connecting {
            *self.last_error.lock() = None;
        }
        debug!(port = %self.port, from = %previous, to = %to, "Port state changed");
        Ok(previous)
    }

    /// Record a fault; returns false when the port was not in a faultable state
    pub fn fault(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        match self.transition(PortState::Faulted) {
            Ok(_) => {
                *self.last_error.lock() = Some(reason);
                true
            }
            Err(_) => false,
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn ensure_not_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            Err(PortError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Mark disposed; returns false if it already was
    pub fn dispose(&self) -> bool {
        !self.disposed.swap(true, Ordering::AcqRel)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
