//! Catalog Client
//!
//! Proxy to a catalog service. Remembers what it published so a periodic
//! refresh keeps those entries alive, and resolves logical names for
//! [`ProxyPort`]s linked by name.

use crate::entry::{CatalogEntry, EntryList, ListEntries, Publish, Resolve, Resolved, Unpublish};
use crate::error::{CatalogError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use port_actors::{LinkTarget, NameResolver, PortError, PortState, ProxyPort};
use port_config::{PortConfig, PortSettings};
use port_network::ActorUri;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct CatalogClient {
    proxy: ProxyPort,
    published: Arc<Mutex<BTreeMap<String, CatalogEntry>>>,
}

impl CatalogClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_settings(name, &PortSettings::default())
    }

    pub fn with_settings(name: impl Into<String>, settings: &PortSettings) -> Self {
        Self {
            proxy: ProxyPort::builder(name).settings(settings).build(),
            published: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Client connected to the catalog named in `config`
    pub async fn connect_configured(name: impl Into<String>, config: &PortConfig) -> Result<Self> {
        let raw = config.catalog.uri.as_deref().ok_or(CatalogError::NotConfigured)?;
        let uri = ActorUri::parse(raw).map_err(|err| CatalogError::InvalidUri {
            uri: raw.to_string(),
            reason: err.to_string(),
        })?;
        let client = Self::with_settings(name, &config.port);
        client.connect(uri).await?;
        Ok(client)
    }

    pub async fn connect(&self, target: impl Into<LinkTarget>) -> Result<()> {
        self.proxy.connect_to(target).await?;
        Ok(())
    }

    pub fn proxy(&self) -> &ProxyPort {
        &self.proxy
    }

    pub fn state(&self) -> PortState {
        self.proxy.state()
    }

    /// Publish `entry` and remember it for [`CatalogClient::refresh`]
    ///
    /// An entry is remembered even if the catalog could not be reached, so
    /// a later refresh retries it. Entries the catalog rejects are not.
    pub async fn publish(&self, entry: CatalogEntry) -> Result<bool> {
        let name = entry.name.clone();
        match self.proxy.call::<Publish, bool>(Publish { entry: entry.clone() }).await {
            Ok(accepted) => {
                self.published.lock().insert(name, entry);
                Ok(accepted)
            }
            Err(err @ PortError::Remote(_)) => Err(err.into()),
            Err(err) => {
                self.published.lock().insert(name, entry);
                Err(err.into())
            }
        }
    }

    pub async fn unpublish(&self, name: &str) -> Result<bool> {
        self.published.lock().remove(name);
        let removed = self
            .proxy
            .call::<Unpublish, bool>(Unpublish {
                name: name.to_string(),
            })
            .await?;
        Ok(removed)
    }

    pub async fn resolve(&self, name: &str) -> Result<Option<CatalogEntry>> {
        let resolved: Resolved = self
            .proxy
            .call(Resolve {
                name: name.to_string(),
            })
            .await?;
        Ok(resolved.entry)
    }

    /// Live entries whose name starts with `prefix`
    pub async fn list(&self, prefix: &str) -> Result<Vec<CatalogEntry>> {
        let list: EntryList = self
            .proxy
            .call(ListEntries {
                prefix: prefix.to_string(),
            })
            .await?;
        Ok(list.entries)
    }

    /// Names this client keeps alive
    pub fn published(&self) -> Vec<String> {
        self.published.lock().keys().cloned().collect()
    }

    /// Re-publish every remembered entry; returns how many were accepted
    pub async fn refresh(&self) -> Result<usize> {
        let entries: Vec<CatalogEntry> = self.published.lock().values().cloned().collect();
        let mut accepted = 0;
        for entry in entries {
            if self.proxy.call::<Publish, bool>(Publish { entry }).await? {
                accepted += 1;
            }
        }
        debug!(client = %self.proxy.name(), accepted, "Catalog refresh complete");
        Ok(accepted)
    }

    /// Refresh every `interval` until the returned task is stopped or dropped
    ///
    /// A lost catalog connection is re-established on the next tick.
    pub fn spawn_refresh(&self, interval: Duration) -> RefreshTask {
        let client = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !client.proxy.state().is_connected() {
                    if let Err(err) = client.proxy.connect().await {
                        warn!(client = %client.proxy.name(), error = %err, "Catalog unreachable, refresh skipped");
                        continue;
                    }
                    info!(client = %client.proxy.name(), "Reconnected to catalog");
                }
                if let Err(err) = client.refresh().await {
                    warn!(client = %client.proxy.name(), error = %err, "Catalog refresh failed");
                }
            }
        });
        RefreshTask { handle }
    }

    pub async fn disconnect(&self) {
        self.proxy.disconnect().await;
    }
}

#[async_trait]
impl NameResolver for CatalogClient {
    async fn resolve(&self, name: &str) -> port_actors::Result<Option<ActorUri>> {
        let resolved: Resolved = self
            .proxy
            .call(Resolve {
                name: name.to_string(),
            })
            .await?;
        resolved
            .entry
            .map(|entry| entry.actor_uri().map_err(|err| PortError::connect(&entry.uri, err)))
            .transpose()
    }
}

/// Handle to a background refresh loop; aborts the loop when dropped
pub struct RefreshTask {
    handle: JoinHandle<()>,
}

impl RefreshTask {
    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
