//! Port-Sharing Listener Registry
//!
//! ## Purpose
//!
//! Every Service Port reachable over TCP shares one listener per TCP port.
//! Each listener owns a `path → acceptor` table; incoming connections name
//! their target path in the handshake and are handed to the matching
//! service. Unknown paths are rejected here and never reach a Service Port.
//!
//! ## Architecture Role
//!
//! ```text
//! TcpListener(:7400) ──► handshake ──► path table ──► acceptor (/ns/quotes)
//!                                         │
//!                                         └─────────► acceptor (/ns/orders)
//! ```
//!
//! ## Lifecycle
//!
//! The process-wide registry is created on first access ([`ListenerRegistry::init`])
//! and torn down explicitly with [`ListenerRegistry::shutdown_all`]. A listener
//! stops accepting as soon as its last path unbinds.

use super::tcp::{self, FrameReader, FrameWriter};
use crate::uri::ActorUri;
use crate::{Result, TransportError};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Time a new connection gets to send its hello frame
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Receiver of connections that passed the handshake
pub trait ConnectionAcceptor: Send + Sync {
    fn accept(&self, reader: FrameReader, writer: FrameWriter);
}

type PathTable = Arc<Mutex<HashMap<String, Arc<dyn ConnectionAcceptor>>>>;

struct SharedListener {
    local_addr: SocketAddr,
    paths: PathTable,
    accept_task: JoinHandle<()>,
}

/// Registry of shared TCP listeners, keyed by TCP port
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<u16, SharedListener>>,
}

static GLOBAL_LISTENERS: Lazy<ListenerRegistry> = Lazy::new(ListenerRegistry::new);

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide registry, created on first access
    pub fn init() -> &'static ListenerRegistry {
        &GLOBAL_LISTENERS
    }

    /// Bind `uri`'s path on its TCP port, starting a listener if needed
    ///
    /// Returns the bound address with the actual port filled in, which
    /// differs from `uri` when port 0 was requested.
    pub async fn bind(
        &self,
        uri: &ActorUri,
        acceptor: Arc<dyn ConnectionAcceptor>,
        max_frame_size: usize,
    ) -> Result<ActorUri> {
        if uri.port() != 0 && self.try_share(uri, &acceptor)? {
            return Ok(uri.clone());
        }

        let listener = match TcpListener::bind(uri.authority()).await {
            Ok(listener) => listener,
            Err(e) => {
                // Lost a race with another bind on the same port
                if uri.port() != 0 && self.try_share(uri, &acceptor)? {
                    return Ok(uri.clone());
                }
                return Err(TransportError::network_with_source(
                    format!("Failed to bind TCP listener on {}", uri.authority()),
                    e,
                ));
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::network_with_source("Failed to read listener address", e))?;

        let paths: PathTable = Arc::new(Mutex::new(HashMap::new()));
        paths.lock().insert(uri.path().to_string(), acceptor);
        let accept_task = tokio::spawn(accept_loop(listener, paths.clone(), max_frame_size));

        let bound = uri.with_port(local_addr.port());
        self.listeners.lock().insert(
            local_addr.port(),
            SharedListener {
                local_addr,
                paths,
                accept_task,
            },
        );
        info!(addr = %local_addr, path = uri.path(), "TCP listener started");
        Ok(bound)
    }

    /// Add a path to an existing listener; `Ok(false)` when none exists
    fn try_share(&self, uri: &ActorUri, acceptor: &Arc<dyn ConnectionAcceptor>) -> Result<bool> {
        let listeners = self.listeners.lock();
        let Some(shared) = listeners.get(&uri.port()) else {
            return Ok(false);
        };
        let mut paths = shared.paths.lock();
        if paths.contains_key(uri.path()) {
            return Err(TransportError::configuration(
                format!("Path '{}' already bound on port {}", uri.path(), uri.port()),
                Some("path"),
            ));
        }
        paths.insert(uri.path().to_string(), acceptor.clone());
        debug!(addr = %shared.local_addr, path = uri.path(), "Path added to shared listener");
        Ok(true)
    }

    /// Remove `uri`'s path; stops the listener when it was the last one
    pub fn unbind(&self, uri: &ActorUri) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(shared) = listeners.get(&uri.port()) else {
            return false;
        };
        let (removed, now_empty) = {
            let mut paths = shared.paths.lock();
            let removed = paths.remove(uri.path()).is_some();
            (removed, paths.is_empty())
        };
        if now_empty {
            if let Some(shared) = listeners.remove(&uri.port()) {
                shared.accept_task.abort();
                info!(addr = %shared.local_addr, "TCP listener stopped");
            }
        }
        removed
    }

    /// Stop every listener
    pub fn shutdown_all(&self) {
        let drained: Vec<SharedListener> = self.listeners.lock().drain().map(|(_, l)| l).collect();
        for shared in drained {
            shared.paths.lock().clear();
            shared.accept_task.abort();
            info!(addr = %shared.local_addr, "TCP listener stopped");
        }
    }

    /// Paths currently served on a TCP port
    pub fn bound_paths(&self, port: u16) -> Vec<String> {
        self.listeners
            .lock()
            .get(&port)
            .map(|shared| {
                let mut paths: Vec<String> = shared.paths.lock().keys().cloned().collect();
                paths.sort();
                paths
            })
            .unwrap_or_default()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

async fn accept_loop(listener: TcpListener, paths: PathTable, max_frame_size: usize) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let paths = paths.clone();
                tokio::spawn(async move {
                    if let Err(e) = route_connection(stream, paths, max_frame_size).await {
                        warn!(peer = %peer, error = %e, "Rejected inbound connection");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept TCP connection");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

async fn route_connection(stream: TcpStream, paths: PathTable, max_frame_size: usize) -> Result<()> {
    let (mut reader, mut writer) = tcp::framed(stream, max_frame_size)?;
    let path = tcp::read_hello(&mut reader, HANDSHAKE_TIMEOUT).await?;

    let acceptor = paths.lock().get(&path).cloned();
    match acceptor {
        Some(acceptor) => {
            writer.send_frame(tcp::HANDSHAKE_OK.as_bytes()).await?;
            debug!(peer = %reader.peer_addr(), path = %path, "Connection routed");
            acceptor.accept(reader, writer);
            Ok(())
        }
        None => {
            writer
                .send_frame(tcp::HANDSHAKE_UNKNOWN_PATH.as_bytes())
                .await?;
            writer.shutdown().await;
            Err(TransportError::handshake(path, "unknown path"))
        }
    }
}
