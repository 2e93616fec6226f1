//! Catalog Store
//!
//! Entries keyed by name with an expiry deadline. Time is passed in by the
//! caller so expiry is deterministic under test.

use crate::entry::CatalogEntry;
use crate::error::{CatalogError, Result};
use port_network::ActorUri;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredEntry {
    entry: CatalogEntry,
    expires_at: Instant,
}

/// Result of accepting a publication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    /// Name was not present (or had expired) before this publication
    pub is_new: bool,
    /// Copy to hand to peer catalogs, with its hop count already advanced
    pub forward: Option<CatalogEntry>,
}

#[derive(Debug)]
pub struct CatalogStore {
    entries: HashMap<String, StoredEntry>,
    default_timeout: Duration,
    max_hop_count: u8,
}

impl CatalogStore {
    pub fn new(default_timeout: Duration, max_hop_count: u8) -> Self {
        Self {
            entries: HashMap::new(),
            default_timeout,
            max_hop_count,
        }
    }

    pub fn max_hop_count(&self) -> u8 {
        self.max_hop_count
    }

    fn lifetime(&self, entry: &CatalogEntry) -> Duration {
        match entry.timeout_seconds {
            0 => self.default_timeout,
            secs => Duration::from_secs(u64::from(secs)),
        }
    }

    /// Store or refresh `entry`, returning the copy to forward, if any
    ///
    /// Only copies whose hop count is below the maximum travel on.
    pub fn publish(&mut self, entry: CatalogEntry, now: Instant) -> Result<Accepted> {
        if entry.name.is_empty() {
            return Err(CatalogError::invalid_entry("", "name is empty"));
        }
        if let Err(err) = ActorUri::parse(&entry.uri) {
            return Err(CatalogError::invalid_entry(&entry.name, err.to_string()));
        }

        // a live entry keeps its lower hop count; a copy echoed back by a
        // peer refreshes the deadline but travels no further
        let mut entry = entry;
        let live_hops = self
            .entries
            .get(&entry.name)
            .filter(|stored| stored.expires_at > now)
            .map(|stored| stored.entry.hop_count);
        let echoed = live_hops.is_some_and(|hops| hops < entry.hop_count);
        if let Some(hops) = live_hops {
            entry.hop_count = entry.hop_count.min(hops);
        }

        let forward = (!echoed && entry.hop_count < self.max_hop_count).then(|| CatalogEntry {
            hop_count: entry.hop_count + 1,
            ..entry.clone()
        });
        let expires_at = now + self.lifetime(&entry);
        let previous = self.entries.insert(
            entry.name.clone(),
            StoredEntry {
                entry,
                expires_at,
            },
        );
        let is_new = previous.map_or(true, |stored| stored.expires_at <= now);
        Ok(Accepted { is_new, forward })
    }

    pub fn unpublish(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    /// Live entry for `name`
    pub fn resolve(&self, name: &str, now: Instant) -> Option<CatalogEntry> {
        self.entries
            .get(name)
            .filter(|stored| stored.expires_at > now)
            .map(|stored| stored.entry.clone())
    }

    /// Live entries whose name starts with `prefix`, sorted by name
    pub fn list(&self, prefix: &str, now: Instant) -> Vec<CatalogEntry> {
        let mut entries: Vec<CatalogEntry> = self
            .entries
            .values()
            .filter(|stored| stored.expires_at > now && stored.entry.name.starts_with(prefix))
            .map(|stored| stored.entry.clone())
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Drop expired entries, returning their names
    pub fn expire(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, stored)| stored.expires_at <= now)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &expired {
            self.entries.remove(name);
            debug!(name = %name, "Catalog entry expired");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
