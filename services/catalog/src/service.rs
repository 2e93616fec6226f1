//! Catalog Service
//!
//! A [`ServicePort`] answering `Publish`, `Unpublish`, `Resolve` and
//! `ListEntries`, backed by a [`CatalogStore`]. Accepted publications are
//! forwarded to peer catalogs as notifications; the hop count carried by
//! each copy bounds how far a publication travels.

use crate::entry::{CatalogEntry, EntryList, ListEntries, Publish, Resolve, Resolved, Unpublish};
use crate::error::{CatalogError, Result};
use crate::store::CatalogStore;
use parking_lot::Mutex;
use port_actors::{LinkTarget, PortState, ProxyPort, ServicePort};
use port_config::{CatalogSettings, PortConfig, PortSettings};
use port_network::ActorUri;
use port_types::{ErrorCode, RemoteError};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Error code returned for publications the store rejects
pub const INVALID_ENTRY: u16 = 400;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

struct CatalogShared {
    name: String,
    store: Mutex<CatalogStore>,
    peers: Vec<ProxyPort>,
}

impl CatalogShared {
    fn publish(self: &Arc<Self>, entry: CatalogEntry) -> anyhow::Result<bool> {
        let name = entry.name.clone();
        let hop_count = entry.hop_count;
        let accepted = self
            .store
            .lock()
            .publish(entry, Instant::now())
            .map_err(|err| RemoteError::new(ErrorCode::Application(INVALID_ENTRY), err.to_string()))?;
        if accepted.is_new {
            info!(catalog = %self.name, name = %name, hop_count, "Entry published");
        } else {
            debug!(catalog = %self.name, name = %name, "Entry refreshed");
        }
        if let Some(copy) = accepted.forward {
            if !self.peers.is_empty() {
                let shared = Arc::clone(self);
                tokio::spawn(async move { shared.forward(copy).await });
            }
        }
        Ok(true)
    }

    async fn forward(&self, entry: CatalogEntry) {
        for peer in &self.peers {
            if !peer.state().is_connected() {
                if let Err(err) = peer.connect().await {
                    warn!(catalog = %self.name, peer = %peer.name(), error = %err, "Peer catalog unreachable");
                    continue;
                }
            }
            let publish = Publish {
                entry: entry.clone(),
            };
            match peer.send_notification(String::new(), publish).await {
                Ok(()) => debug!(
                    catalog = %self.name,
                    peer = %peer.name(),
                    name = %entry.name,
                    hop_count = entry.hop_count,
                    "Forwarded publication"
                ),
                Err(err) => warn!(catalog = %self.name, peer = %peer.name(), error = %err, "Forwarding failed"),
            }
        }
    }

    fn sweep(&self) -> usize {
        let expired = self.store.lock().expire(Instant::now());
        if !expired.is_empty() {
            info!(catalog = %self.name, expired = ?expired, "Dropped expired entries");
        }
        expired.len()
    }
}

/// Directory of published service ports
pub struct CatalogService {
    port: ServicePort,
    shared: Arc<CatalogShared>,
    sweep_interval: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl CatalogService {
    pub fn new(name: impl Into<String>, settings: &CatalogSettings) -> Result<Self> {
        Self::with_port_settings(name, settings, &PortSettings::default())
    }

    pub fn from_config(name: impl Into<String>, config: &PortConfig) -> Result<Self> {
        Self::with_port_settings(name, &config.catalog, &config.port)
    }

    pub fn with_port_settings(
        name: impl Into<String>,
        settings: &CatalogSettings,
        port_settings: &PortSettings,
    ) -> Result<Self> {
        let name = name.into();
        let peers = settings
            .peers
            .iter()
            .enumerate()
            .map(|(index, peer)| -> Result<ProxyPort> {
                let uri = ActorUri::parse(peer).map_err(|err| CatalogError::InvalidUri {
                    uri: peer.clone(),
                    reason: err.to_string(),
                })?;
                let proxy = ProxyPort::builder(format!("{name}-peer-{index}"))
                    .settings(port_settings)
                    .build();
                proxy.link(LinkTarget::Uri(uri))?;
                Ok(proxy)
            })
            .collect::<Result<Vec<_>>>()?;

        let shared = Arc::new(CatalogShared {
            name: name.clone(),
            store: Mutex::new(CatalogStore::new(
                settings.entry_timeout(),
                settings.max_hop_count,
            )),
            peers,
        });

        let port = ServicePort::builder(name)
            .settings(port_settings)
            .on({
                let shared = Arc::clone(&shared);
                move |request: Publish, _ctx| {
                    let result = shared.publish(request.entry);
                    async move { result }
                }
            })
            .on({
                let shared = Arc::clone(&shared);
                move |request: Unpublish, _ctx| {
                    let removed = shared.store.lock().unpublish(&request.name);
                    if removed {
                        info!(catalog = %shared.name, name = %request.name, "Entry unpublished");
                    }
                    async move { Ok(removed) }
                }
            })
            .on({
                let shared = Arc::clone(&shared);
                move |request: Resolve, _ctx| {
                    let entry = shared.store.lock().resolve(&request.name, Instant::now());
                    async move { Ok(Resolved { entry }) }
                }
            })
            .on({
                let shared = Arc::clone(&shared);
                move |request: ListEntries, _ctx| {
                    let entries = shared.store.lock().list(&request.prefix, Instant::now());
                    async move { Ok(EntryList { entries }) }
                }
            })
            .build()?;

        Ok(Self {
            port,
            shared,
            sweep_interval: settings.refresh_interval().max(MIN_SWEEP_INTERVAL),
            sweeper: Mutex::new(None),
        })
    }

    pub fn port(&self) -> &ServicePort {
        &self.port
    }

    pub fn name(&self) -> &str {
        self.port.name()
    }

    pub fn state(&self) -> PortState {
        self.port.state()
    }

    pub fn uri(&self) -> Option<ActorUri> {
        self.port.uri()
    }

    /// Listen on `uri` and start expiring stale entries
    pub async fn open(&self, uri: &ActorUri) -> Result<ActorUri> {
        let bound = self.port.open(uri).await?;
        self.start_sweeper();
        Ok(bound)
    }

    /// Open for in-process clients only
    pub async fn open_local(&self) -> Result<()> {
        self.port.open_local().await?;
        self.start_sweeper();
        Ok(())
    }

    fn start_sweeper(&self) {
        let shared: Weak<CatalogShared> = Arc::downgrade(&self.shared);
        let period = self.sweep_interval;
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                shared.sweep();
            }
        });
        if let Some(previous) = self.sweeper.lock().replace(task) {
            previous.abort();
        }
    }

    /// Live entries, sorted by name
    pub fn entries(&self) -> Vec<CatalogEntry> {
        self.shared.store.lock().list("", Instant::now())
    }

    /// Drop expired entries now; returns how many were removed
    pub fn expire_now(&self) -> usize {
        self.shared.sweep()
    }

    pub fn peers(&self) -> &[ProxyPort] {
        &self.shared.peers
    }

    pub async fn disconnect(&self) {
        if let Some(task) = self.sweeper.lock().take() {
            task.abort();
        }
        for peer in &self.shared.peers {
            peer.disconnect().await;
        }
        self.port.disconnect().await;
    }
}

impl Drop for CatalogService {
    fn drop(&mut self) {
        if let Some(task) = self.sweeper.lock().take() {
            task.abort();
        }
    }
}
