//! Port Registry
//!
//! Process-wide table of live ports, used for bulk shutdown. Entries hold
//! weak references: registration never keeps a port alive, and a port
//! removes itself when its last handle drops.

use crate::lifecycle::PortState;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info};
use uuid::Uuid;

/// Unique port identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId {
    id: Uuid,
}

impl PortId {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    pub fn uuid(&self) -> Uuid {
        self.id
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port-{}", self.id.simple())
    }
}

impl Default for PortId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortRole {
    Proxy,
    Service,
}

/// What the registry needs from a port
#[async_trait]
pub trait ManagedPort: Send + Sync {
    fn port_id(&self) -> PortId;
    fn port_name(&self) -> &str;
    fn role(&self) -> PortRole;
    fn current_state(&self) -> PortState;
    async fn shutdown(&self);
}

/// Snapshot of one registered port
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub id: PortId,
    pub name: String,
    pub role: PortRole,
    pub state: PortState,
}

pub struct PortRegistry {
    ports: Mutex<HashMap<PortId, Weak<dyn ManagedPort>>>,
}

static GLOBAL_PORTS: Lazy<PortRegistry> = Lazy::new(PortRegistry::new);

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PortRegistry {
    pub fn new() -> Self {
        Self {
            ports: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide registry, created on first access
    pub fn init() -> &'static PortRegistry {
        &GLOBAL_PORTS
    }

    pub fn register(&self, port: Weak<dyn ManagedPort>) {
        if let Some(live) = port.upgrade() {
            debug!(port = live.port_name(), id = %live.port_id(), role = ?live.role(), "Registering port");
            self.ports.lock().insert(live.port_id(), port);
        }
    }

    pub fn unregister(&self, id: &PortId) -> bool {
        let removed = self.ports.lock().remove(id).is_some();
        if removed {
            debug!(id = %id, "Unregistered port");
        }
        removed
    }

    fn live(&self) -> Vec<Arc<dyn ManagedPort>> {
        let mut ports = self.ports.lock();
        ports.retain(|_, port| port.strong_count() > 0);
        ports.values().filter_map(Weak::upgrade).collect()
    }

    pub fn list(&self) -> Vec<PortInfo> {
        self.live()
            .into_iter()
            .map(|port| PortInfo {
                id: port.port_id(),
                name: port.port_name().to_string(),
                role: port.role(),
                state: port.current_state(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Disconnect every live port: proxies first, then services
    pub async fn disconnect_all(&self) {
        let (proxies, services): (Vec<_>, Vec<_>) = self
            .live()
            .into_iter()
            .partition(|port| port.role() == PortRole::Proxy);
        info!(
            proxies = proxies.len(),
            services = services.len(),
            "Disconnecting all ports"
        );
        futures::future::join_all(proxies.iter().map(|port| port.shutdown())).await;
        futures::future::join_all(services.iter().map(|port| port.shutdown())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakePort {
        id: PortId,
        role: PortRole,
        stopped: AtomicBool,
    }

    #[async_trait]
    impl ManagedPort for FakePort {
        fn port_id(&self) -> PortId {
            self.id
        }
        fn port_name(&self) -> &str {
            "fake"
        }
        fn role(&self) -> PortRole {
            self.role
        }
        fn current_state(&self) -> PortState {
            if self.stopped.load(Ordering::Acquire) {
                PortState::Disconnected
            } else {
                PortState::Ok
            }
        }
        async fn shutdown(&self) {
            self.stopped.store(true, Ordering::Release);
        }
    }

    fn fake(role: PortRole) -> Arc<FakePort> {
        Arc::new(FakePort {
            id: PortId::new(),
            role,
            stopped: AtomicBool::new(false),
        })
    }

    #[test]
    fn test_port_id_display() {
        let id = PortId::new();
        assert!(id.to_string().starts_with("port-"));
        assert_ne!(id, PortId::new());
    }

    #[tokio::test]
    async fn test_disconnect_all_reaches_every_port() {
        let registry = PortRegistry::new();
        let proxy = fake(PortRole::Proxy);
        let service = fake(PortRole::Service);
        let proxy_dyn: Arc<dyn ManagedPort> = proxy.clone();
        let service_dyn: Arc<dyn ManagedPort> = service.clone();
        registry.register(Arc::downgrade(&proxy_dyn));
        registry.register(Arc::downgrade(&service_dyn));
        assert_eq!(registry.len(), 2);

        registry.disconnect_all().await;
        assert!(registry
            .list()
            .iter()
            .all(|info| info.state == PortState::Disconnected));
    }

    #[test]
    fn test_dropped_ports_disappear() {
        let registry = PortRegistry::new();
        let port: Arc<dyn ManagedPort> = fake(PortRole::Proxy);
        registry.register(Arc::downgrade(&port));
        let id = port.port_id();
        drop(port);
        assert!(registry.is_empty());
        assert!(!registry.unregister(&id));
    }
}
