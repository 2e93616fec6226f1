//! Name resolution seam
//!
//! A Proxy Port linked by logical name asks its [`NameResolver`] for the
//! service address when it connects. The catalog client is the production
//! implementation; [`StaticResolver`] covers fixed deployments and tests.

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use port_network::ActorUri;
use std::collections::HashMap;

#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Current address of `name`, or `None` when nothing is published
    async fn resolve(&self, name: &str) -> Result<Option<ActorUri>>;
}

/// Fixed name table
#[derive(Debug, Default)]
pub struct StaticResolver {
    entries: RwLock<HashMap<String, ActorUri>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, name: impl Into<String>, uri: ActorUri) -> Self {
        self.insert(name, uri);
        self
    }

    pub fn insert(&self, name: impl Into<String>, uri: ActorUri) {
        self.entries.write().insert(name.into(), uri);
    }

    pub fn remove(&self, name: &str) -> Option<ActorUri> {
        self.entries.write().remove(name)
    }
}

#[async_trait]
impl NameResolver for StaticResolver {
    async fn resolve(&self, name: &str) -> Result<Option<ActorUri>> {
        Ok(self.entries.read().get(name).cloned())
    }
}
