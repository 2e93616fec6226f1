//! In-process drivers
//!
//! `local://` services live in a process-wide endpoint table. Messages pass
//! between the two sides by reference, so in-process payloads are never
//! serialized.

use super::{
    next_client_id, ClientDriver, DriverSink, DriverState, DriverStateCell, ServiceDriver,
    ServiceSink,
};
use crate::uri::ActorUri;
use crate::{Result, TransportError};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use port_types::{ClientId, Message};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Process-wide table of in-process services, keyed by path
pub struct LocalEndpoints {
    services: Mutex<HashMap<String, Arc<dyn ServiceSink>>>,
}

static GLOBAL_ENDPOINTS: Lazy<LocalEndpoints> = Lazy::new(LocalEndpoints::new);

impl Default for LocalEndpoints {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalEndpoints {
    pub fn new() -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
        }
    }

    pub fn init() -> &'static LocalEndpoints {
        &GLOBAL_ENDPOINTS
    }

    pub fn bind(&self, uri: &ActorUri, sink: Arc<dyn ServiceSink>) -> Result<ActorUri> {
        let mut services = self.services.lock();
        if services.contains_key(uri.path()) {
            return Err(TransportError::configuration(
                format!("Local path '{}' already bound", uri.path()),
                Some("path"),
            ));
        }
        services.insert(uri.path().to_string(), sink);
        Ok(uri.clone())
    }

    pub fn unbind(&self, uri: &ActorUri) -> bool {
        self.services.lock().remove(uri.path()).is_some()
    }

    pub fn lookup(&self, uri: &ActorUri) -> Option<Arc<dyn ServiceSink>> {
        self.services.lock().get(uri.path()).cloned()
    }

    pub fn shutdown_all(&self) {
        self.services.lock().clear();
    }
}

struct LocalLink {
    client: Arc<LocalClientDriver>,
    service: Arc<dyn ServiceSink>,
}

/// Proxy-side in-process driver
pub struct LocalServiceDriver {
    endpoints: &'static LocalEndpoints,
    state: Arc<DriverStateCell>,
    link: Mutex<Option<LocalLink>>,
    opened: AtomicBool,
}

impl Default for LocalServiceDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalServiceDriver {
    pub fn new() -> Self {
        Self::with_endpoints(LocalEndpoints::init())
    }

    pub fn with_endpoints(endpoints: &'static LocalEndpoints) -> Self {
        Self {
            endpoints,
            state: Arc::new(DriverStateCell::new()),
            link: Mutex::new(None),
            opened: AtomicBool::new(false),
        }
    }

    /// Attach directly to a service sink, bypassing the endpoint table
    pub fn attach(&self, service: Arc<dyn ServiceSink>, sink: Arc<dyn DriverSink>) -> Result<()> {
        if self.opened.swap(true, Ordering::AcqRel) {
            return Err(TransportError::closed("driver instances cannot be reopened"));
        }
        let client = Arc::new(LocalClientDriver {
            id: next_client_id(),
            proxy: sink,
            proxy_state: self.state.clone(),
            closed: AtomicBool::new(false),
        });
        service.on_client_connected(client.clone());
        *self.link.lock() = Some(LocalLink { client, service });
        self.state.set(DriverState::Ok);
        Ok(())
    }
}

#[async_trait]
impl ServiceDriver for LocalServiceDriver {
    async fn open(&self, target: &ActorUri, sink: Arc<dyn DriverSink>) -> Result<()> {
        match self.endpoints.lookup(target) {
            Some(service) => {
                self.attach(service, sink)?;
                debug!(uri = %target, "Linked to local service");
                Ok(())
            }
            None => {
                self.opened.store(true, Ordering::Release);
                self.state.fault();
                Err(TransportError::connection(
                    format!("No local service at {target}"),
                    None,
                ))
            }
        }
    }

    async fn send_request(&self, message: Message) -> Result<()> {
        let (id, service) = {
            let link = self.link.lock();
            let link = link
                .as_ref()
                .ok_or_else(|| TransportError::closed("driver is not open"))?;
            if link.client.closed.load(Ordering::Acquire) {
                return Err(TransportError::closed("local service disconnected"));
            }
            (link.client.id, link.service.clone())
        };
        service.on_client_message(id, message.with_client(id));
        Ok(())
    }

    async fn dispose(&self) {
        self.state.set(DriverState::Disconnected);
        let link = self.link.lock().take();
        if let Some(link) = link {
            if !link.client.closed.swap(true, Ordering::AcqRel) {
                link.service.on_client_disconnected(link.client.id);
            }
        }
    }

    fn connection_state(&self) -> DriverState {
        self.state.get()
    }

    fn format_name(&self) -> &'static str {
        "local"
    }
}

/// Service-side in-process driver
pub struct LocalClientDriver {
    id: ClientId,
    proxy: Arc<dyn DriverSink>,
    proxy_state: Arc<DriverStateCell>,
    closed: AtomicBool,
}

#[async_trait]
impl ClientDriver for LocalClientDriver {
    fn client_id(&self) -> ClientId {
        self.id
    }

    fn peer(&self) -> String {
        "in-process".to_string()
    }

    async fn send_to_client(&self, message: Message) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::closed(format!("{} is disconnected", self.id)));
        }
        self.proxy.on_message(message);
        Ok(())
    }

    async fn disconnect_from_client(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.proxy_state.set(DriverState::Disconnected);
        self.proxy.on_closed();
    }
}
