//! # Proxy Port
//!
//! ## Purpose
//!
//! Output-side endpoint: links to one service, sends requests and
//! notifications through a protocol driver, and correlates the answers.
//!
//! ## Lifecycle
//!
//! - [`ProxyPort::link`] only records the target. No I/O happens.
//! - [`ProxyPort::connect`] creates a fresh driver and opens it. It is
//!   idempotent once `Ok`, and a failed attempt leaves the port `Faulted`
//!   until the caller connects again. Nothing here retries on its own.
//! - [`ProxyPort::disconnect`] always succeeds, releases the driver and fails
//!   every pending operation with [`PortError::ConnectionClosed`].
//!
//! ## Sending While Connecting
//!
//! Sends made while the port is `Connecting` wait in a bounded queue
//! (`send_queue_depth`) and go out in order once the driver is open; past
//! that depth they fail with [`PortError::QueueFull`]. In every other
//! non-`Ok` state sends fail immediately with [`PortError::NotConnected`].
//!
//! ## Driver Callbacks
//!
//! Each connect attempt gets a generation number. Callbacks from a driver
//! that belongs to an older generation are ignored, so a late close from a
//! replaced connection can never fault the current one.

use crate::correlation::{CorrelationTable, PendingOperation};
use crate::error::{PortError, Result};
use crate::lifecycle::{Lifecycle, PortState};
use crate::registry::{ManagedPort, PortId, PortRegistry, PortRole};
use crate::resolver::NameResolver;
use crate::service::ServicePort;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use port_config::PortSettings;
use port_network::{
    ActorUri, DriverFactory, DriverOptions, DriverSink, LocalServiceDriver, ServiceDriver,
    TransportError,
};
use port_types::{Message, MessageType, Payload, PayloadType, RequestId, ServiceShutdown};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

const NOTIFICATION_CAPACITY: usize = 256;

/// Where a proxy sends its traffic
#[derive(Clone)]
pub enum LinkTarget {
    /// A Service Port in this process, reached without serialization
    Local(ServicePort),
    Uri(ActorUri),
    /// Logical name resolved through the proxy's [`NameResolver`] at connect time
    Name(String),
}

impl fmt::Debug for LinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkTarget::Local(service) => write!(f, "Local({})", service.name()),
            LinkTarget::Uri(uri) => write!(f, "Uri({uri})"),
            LinkTarget::Name(name) => write!(f, "Name({name})"),
        }
    }
}

impl fmt::Display for LinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkTarget::Local(service) => write!(f, "in-process service '{}'", service.name()),
            LinkTarget::Uri(uri) => write!(f, "{uri}"),
            LinkTarget::Name(name) => write!(f, "name '{name}'"),
        }
    }
}

impl From<ServicePort> for LinkTarget {
    fn from(service: ServicePort) -> Self {
        LinkTarget::Local(service)
    }
}

impl From<&ServicePort> for LinkTarget {
    fn from(service: &ServicePort) -> Self {
        LinkTarget::Local(service.clone())
    }
}

impl From<ActorUri> for LinkTarget {
    fn from(uri: ActorUri) -> Self {
        LinkTarget::Uri(uri)
    }
}

/// Builder for [`ProxyPort`]
pub struct ProxyPortBuilder {
    name: String,
    settings: PortSettings,
    resolver: Option<Arc<dyn NameResolver>>,
}

impl ProxyPortBuilder {
    pub fn settings(mut self, settings: &PortSettings) -> Self {
        self.settings = settings.clone();
        self
    }

    pub fn send_queue_depth(mut self, depth: usize) -> Self {
        self.settings.send_queue_depth = depth;
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn build(self) -> ProxyPort {
        let factory = DriverFactory::new(DriverOptions {
            max_frame_size: self.settings.max_message_size,
            connect_timeout: self.settings.connect_timeout(),
        });
        let inner = Arc::new(ProxyInner {
            id: PortId::new(),
            lifecycle: Lifecycle::new(self.name.clone()),
            correlation: CorrelationTable::new(self.name.clone(), self.settings.max_request_id()),
            name: self.name,
            send_queue_depth: self.settings.send_queue_depth,
            factory,
            resolver: RwLock::new(self.resolver),
            target: Mutex::new(None),
            uri: Mutex::new(None),
            link: Mutex::new(LinkState::default()),
            notifications: broadcast::channel(NOTIFICATION_CAPACITY).0,
            connect_gate: tokio::sync::Mutex::new(()),
        });
        let managed: Weak<dyn ManagedPort> = Arc::downgrade(&inner) as Weak<dyn ManagedPort>;
        PortRegistry::init().register(managed);
        ProxyPort { inner }
    }
}

#[derive(Default)]
struct LinkState {
    driver: Option<Arc<dyn ServiceDriver>>,
    queue: VecDeque<Message>,
    generation: u64,
}

struct ProxyInner {
    id: PortId,
    name: String,
    send_queue_depth: usize,
    factory: DriverFactory,
    resolver: RwLock<Option<Arc<dyn NameResolver>>>,
    lifecycle: Lifecycle,
    correlation: CorrelationTable,
    target: Mutex<Option<LinkTarget>>,
    uri: Mutex<Option<ActorUri>>,
    link: Mutex<LinkState>,
    notifications: broadcast::Sender<Message>,
    connect_gate: tokio::sync::Mutex<()>,
}

/// Output-side actor port
///
/// Cheap to clone; clones share one connection and one correlation table.
#[derive(Clone)]
pub struct ProxyPort {
    inner: Arc<ProxyInner>,
}

impl fmt::Debug for ProxyPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyPort")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("target", &*self.inner.target.lock())
            .finish()
    }
}

impl ProxyPort {
    pub fn builder(name: impl Into<String>) -> ProxyPortBuilder {
        ProxyPortBuilder {
            name: name.into(),
            settings: PortSettings::default(),
            resolver: None,
        }
    }

    /// Proxy with default settings
    pub fn new(name: impl Into<String>) -> Self {
        Self::builder(name).build()
    }

    pub fn id(&self) -> PortId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> PortState {
        self.inner.lifecycle.state()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<PortState> {
        self.inner.lifecycle.subscribe()
    }

    /// Reason for the most recent fault
    pub fn last_error(&self) -> Option<String> {
        self.inner.lifecycle.last_error()
    }

    /// Address of the connected service, once known
    pub fn uri(&self) -> Option<ActorUri> {
        self.inner.uri.lock().clone()
    }

    pub fn target(&self) -> Option<LinkTarget> {
        self.inner.target.lock().clone()
    }

    pub fn set_resolver(&self, resolver: Arc<dyn NameResolver>) {
        *self.inner.resolver.write() = Some(resolver);
    }

    /// Record the link target; only legal while not connected
    pub fn link(&self, target: impl Into<LinkTarget>) -> Result<()> {
        self.inner.lifecycle.ensure_not_disposed()?;
        let state = self.state();
        if matches!(state, PortState::Connecting | PortState::Ok) {
            return Err(PortError::misuse(format!(
                "proxy '{}' must be disconnected before relinking (state: {state})",
                self.inner.name
            )));
        }
        let target = target.into();
        *self.inner.uri.lock() = match &target {
            LinkTarget::Uri(uri) => Some(uri.clone()),
            LinkTarget::Local(service) => service.uri(),
            LinkTarget::Name(_) => None,
        };
        debug!(port = %self.inner.name, target = %target, "Proxy linked");
        *self.inner.target.lock() = Some(target);
        Ok(())
    }

    /// Open a connection to the linked target
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        inner.lifecycle.ensure_not_disposed()?;
        let _gate = inner.connect_gate.lock().await;
        if inner.lifecycle.state() == PortState::Ok {
            return Ok(());
        }

        let target = inner.target.lock().clone().ok_or(PortError::NotLinked)?;
        if inner.lifecycle.state() == PortState::Connecting {
            // an earlier attempt was dropped mid-way
            inner.lifecycle.fault("connect attempt abandoned");
        }
        inner.lifecycle.transition(PortState::Connecting)?;
        let generation = {
            let mut link = inner.link.lock();
            link.generation += 1;
            link.generation
        };
        let sink: Arc<dyn DriverSink> = Arc::new(ProxySink {
            port: Arc::downgrade(inner),
            generation,
        });

        let opened = inner.open_driver(&target, sink).await;
        let (driver, uri) = match opened {
            Ok(opened) => opened,
            Err(err) => {
                inner.abort_connect(generation, &err);
                return Err(err);
            }
        };
        *inner.uri.lock() = Some(uri.clone());
        inner.complete_connect(generation, driver).await?;
        info!(port = %inner.name, uri = %uri, "Proxy connected");
        Ok(())
    }

    /// Link and connect in one step
    pub async fn connect_to(&self, target: impl Into<LinkTarget>) -> Result<()> {
        self.link(target)?;
        self.connect().await
    }

    /// Send a request and get a handle to its answer
    pub async fn send_request<T, R>(
        &self,
        method: impl Into<String>,
        payload: T,
    ) -> Result<PendingOperation<R>>
    where
        T: PayloadType,
        R: PayloadType,
    {
        self.inner.ensure_can_send()?;
        let operation = self.inner.correlation.register::<R>()?;
        let message = Message::request(operation.request_id(), method, Payload::local(payload))
            .with_source(self.inner.name.clone());
        if let Err(err) = self.inner.transmit(message).await {
            self.inner.correlation.cancel(operation.request_id());
            return Err(err);
        }
        Ok(operation)
    }

    /// Send a request and wait for the typed answer
    pub async fn request<T, R>(&self, method: impl Into<String>, payload: T) -> Result<R>
    where
        T: PayloadType,
        R: PayloadType,
    {
        self.send_request::<T, R>(method, payload).await?.await
    }

    /// Request dispatched by payload type rather than method name
    pub async fn call<T, R>(&self, payload: T) -> Result<R>
    where
        T: PayloadType,
        R: PayloadType,
    {
        self.request::<T, R>(String::new(), payload).await
    }

    /// Fire-and-forget message; the service never answers
    pub async fn send_notification<T: PayloadType>(
        &self,
        method: impl Into<String>,
        payload: T,
    ) -> Result<()> {
        self.inner.ensure_can_send()?;
        let message =
            Message::notification(method, Payload::local(payload)).with_source(self.inner.name.clone());
        self.inner.transmit(message).await
    }

    /// Unsolicited messages from the service, including its shutdown notice
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Message> {
        self.inner.notifications.subscribe()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.correlation.len()
    }

    /// How long each pending request has been waiting, oldest first
    pub fn pending_ages(&self) -> Vec<(RequestId, Duration)> {
        self.inner.correlation.ages()
    }

    /// Watchdog hook: fail requests waiting longer than `max_age`
    pub fn fail_pending_older_than(&self, max_age: Duration) -> usize {
        self.inner.correlation.fail_older_than(max_age)
    }

    pub async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    /// Disconnect and reject any further use
    pub async fn dispose(&self) {
        self.inner.disconnect().await;
        if self.inner.lifecycle.dispose() {
            PortRegistry::init().unregister(&self.inner.id);
        }
    }
}

impl ProxyInner {
    fn ensure_can_send(&self) -> Result<()> {
        self.lifecycle.ensure_not_disposed()?;
        match self.lifecycle.state() {
            PortState::Ok => Ok(()),
            PortState::Connecting if self.send_queue_depth > 0 => Ok(()),
            state => Err(PortError::NotConnected { state }),
        }
    }

    async fn open_driver(
        &self,
        target: &LinkTarget,
        sink: Arc<dyn DriverSink>,
    ) -> Result<(Arc<dyn ServiceDriver>, ActorUri)> {
        match target {
            LinkTarget::Local(service) => {
                let uri = service
                    .uri()
                    .unwrap_or_else(|| ActorUri::local(service.name()));
                let service_sink = service
                    .local_sink()
                    .ok_or_else(|| PortError::connect(&uri, "service is not open"))?;
                let driver = LocalServiceDriver::new();
                driver
                    .attach(service_sink, sink)
                    .map_err(|e| PortError::connect(&uri, e))?;
                Ok((Arc::new(driver), uri))
            }
            LinkTarget::Uri(uri) => Ok((self.open_uri(uri, sink).await?, uri.clone())),
            LinkTarget::Name(name) => {
                let resolver = self.resolver.read().clone().ok_or_else(|| {
                    PortError::misuse(format!(
                        "proxy '{}' is linked by name but has no resolver",
                        self.name
                    ))
                })?;
                let uri = resolver
                    .resolve(name)
                    .await?
                    .ok_or_else(|| PortError::NameNotFound(name.clone()))?;
                debug!(port = %self.name, name = %name, uri = %uri, "Resolved service name");
                Ok((self.open_uri(&uri, sink).await?, uri))
            }
        }
    }

    async fn open_uri(&self, uri: &ActorUri, sink: Arc<dyn DriverSink>) -> Result<Arc<dyn ServiceDriver>> {
        let driver = self.factory.create_service_driver(uri);
        if let Err(err) = driver.open(uri, sink).await {
            driver.dispose().await;
            return Err(PortError::connect(uri, err));
        }
        Ok(driver)
    }

    fn abort_connect(&self, generation: u64, err: &PortError) {
        {
            let mut link = self.link.lock();
            if link.generation != generation {
                return;
            }
            link.queue.clear();
        }
        self.lifecycle.fault(err.to_string());
        let failed = self.correlation.fail_all(PortError::ConnectionClosed);
        warn!(port = %self.name, error = %err, queued_failed = failed, "Proxy connect failed");
    }

    /// Flush queued sends in order, then go `Ok`
    async fn complete_connect(&self, generation: u64, driver: Arc<dyn ServiceDriver>) -> Result<()> {
        let current = {
            let mut link = self.link.lock();
            let current = link.generation == generation;
            if current {
                link.driver = Some(driver.clone());
            }
            current
        };
        if !current {
            driver.dispose().await;
            return Err(PortError::ConnectionClosed);
        }

        loop {
            let next = {
                let mut link = self.link.lock();
                if link.generation != generation {
                    return Err(PortError::ConnectionClosed);
                }
                match link.queue.pop_front() {
                    Some(message) => message,
                    None => {
                        return self.lifecycle.transition(PortState::Ok).map(|_| ()).map_err(|_| {
                            PortError::connect(
                                self.target_label(),
                                self.lifecycle
                                    .last_error()
                                    .unwrap_or_else(|| "connection lost while connecting".into()),
                            )
                        });
                    }
                }
            };
            if let Err(err) = driver.send_request(next).await {
                self.handle_link_lost(generation, format!("send failed: {err}"));
                return Err(err.into());
            }
        }
    }

    fn target_label(&self) -> String {
        self.target
            .lock()
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "unlinked".into())
    }

    async fn transmit(&self, message: Message) -> Result<()> {
        let (driver, generation) = {
            let mut link = self.link.lock();
            match self.lifecycle.state() {
                PortState::Ok => match link.driver.clone() {
                    Some(driver) => (driver, link.generation),
                    None => return Err(PortError::NotConnected { state: PortState::Ok }),
                },
                PortState::Connecting if self.send_queue_depth > 0 => {
                    if link.queue.len() >= self.send_queue_depth {
                        return Err(PortError::QueueFull {
                            depth: self.send_queue_depth,
                        });
                    }
                    link.queue.push_back(message);
                    return Ok(());
                }
                state => return Err(PortError::NotConnected { state }),
            }
        };

        if let Err(err) = driver.send_request(message).await {
            if !matches!(err, TransportError::Encode { .. }) {
                self.handle_link_lost(generation, format!("send failed: {err}"));
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn handle_inbound(&self, generation: u64, message: Message) {
        if self.link.lock().generation != generation {
            return;
        }
        match message.message_type {
            MessageType::Response | MessageType::Error => {
                self.correlation.complete(message);
            }
            MessageType::Notification => {
                if let Some(notice) = message.payload.try_read_as::<ServiceShutdown>() {
                    info!(port = %self.name, service = %notice.service, "Service announced shutdown");
                }
                let _ = self.notifications.send(message);
            }
            MessageType::Request => {
                warn!(
                    port = %self.name,
                    request_id = message.request_id,
                    "Proxy ports do not serve requests; dropping"
                );
            }
        }
    }

    /// The current connection died underneath the port
    fn handle_link_lost(&self, generation: u64, reason: String) {
        let driver = {
            let mut link = self.link.lock();
            if link.generation != generation {
                return;
            }
            link.queue.clear();
            link.driver.take()
        };
        if self.lifecycle.fault(reason.clone()) {
            warn!(port = %self.name, reason = %reason, "Proxy connection faulted");
        }
        self.correlation.fail_all(PortError::ConnectionClosed);
        if let Some(driver) = driver {
            release_driver(driver);
        }
    }

    async fn disconnect(&self) {
        let driver = {
            let mut link = self.link.lock();
            if matches!(
                self.lifecycle.state(),
                PortState::Unlinked | PortState::Disconnected
            ) {
                return;
            }
            if self.lifecycle.transition(PortState::Disconnected).is_err() {
                return;
            }
            link.generation += 1;
            link.queue.clear();
            link.driver.take()
        };
        if let Some(driver) = driver {
            driver.dispose().await;
        }
        let failed = self.correlation.fail_all(PortError::ConnectionClosed);
        info!(port = %self.name, pending_failed = failed, "Proxy disconnected");
    }
}

fn release_driver(driver: Arc<dyn ServiceDriver>) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move { driver.dispose().await });
        }
        Err(_) => drop(driver),
    }
}

#[async_trait]
impl ManagedPort for ProxyInner {
    fn port_id(&self) -> PortId {
        self.id
    }

    fn port_name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> PortRole {
        PortRole::Proxy
    }

    fn current_state(&self) -> PortState {
        self.lifecycle.state()
    }

    async fn shutdown(&self) {
        self.disconnect().await;
    }
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        PortRegistry::init().unregister(&self.id);
        if let Some(driver) = self.link.get_mut().driver.take() {
            release_driver(driver);
        }
    }
}

/// Driver-facing callbacks for one connect attempt
struct ProxySink {
    port: Weak<ProxyInner>,
    generation: u64,
}

impl DriverSink for ProxySink {
    fn on_message(&self, message: Message) {
        if let Some(port) = self.port.upgrade() {
            port.handle_inbound(self.generation, message);
        }
    }

    fn on_fault(&self, error: TransportError) {
        if let Some(port) = self.port.upgrade() {
            port.handle_link_lost(self.generation, error.to_string());
        }
    }

    fn on_closed(&self) {
        if let Some(port) = self.port.upgrade() {
            port.handle_link_lost(self.generation, "connection closed by peer".to_string());
        }
    }
}
