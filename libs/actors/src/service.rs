//! # Service Port
//!
//! ## Purpose
//!
//! Input-side endpoint: accepts connections through the driver factory,
//! dispatches inbound requests to its handler table and answers through the
//! connection each request arrived on.
//!
//! ## Execution Model
//!
//! ```text
//! driver callbacks ──► ServiceEndpoint ──enqueue──► PortWorker ──► DispatchTable
//!  (per connection,      (never blocks)            (one queue)       │
//!   arrival order)                                                   ▼
//!                                     ClientDriver::send_to_client ◄─ reply
//! ```
//!
//! - Non-multithreaded ports run one handler at a time, in arrival order,
//!   across every connected client
//! - Multithreaded ports start handlers in arrival order and let them
//!   interleave
//!
//! Dispatch failures become Error replies; they never take the port down.
//!
//! ## Shutdown
//!
//! [`ServicePort::disconnect`] stops accepting, sends a [`ServiceShutdown`]
//! notification to every linked client (best effort), then closes each
//! client connection.

use crate::dispatch::{DispatchTable, RequestContext};
use crate::error::{PortError, Result};
use crate::lifecycle::{Lifecycle, PortState};
use crate::registry::{ManagedPort, PortId, PortRegistry, PortRole};
use crate::worker::{PortWorker, WorkerMode};
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use port_codec::CodecError;
use port_config::PortSettings;
use port_network::{
    ActorUri, ClientDriver, DriverFactory, DriverOptions, ServiceBinding, ServiceSink,
    TransportError,
};
use port_types::{
    ClientId, Message, MessageType, Payload, PayloadType, RemoteError, ServiceShutdown,
};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Builder for [`ServicePort`]
pub struct ServicePortBuilder {
    name: String,
    multithreaded: bool,
    settings: PortSettings,
    table: DispatchTable,
    error: Option<CodecError>,
}

impl ServicePortBuilder {
    /// Let handlers run concurrently
    pub fn multithreaded(mut self, multithreaded: bool) -> Self {
        self.multithreaded = multithreaded;
        self
    }

    pub fn settings(mut self, settings: &PortSettings) -> Self {
        self.settings = settings.clone();
        self
    }

    fn record(&mut self, result: std::result::Result<(), CodecError>) {
        if let Err(err) = result {
            self.error.get_or_insert(err);
        }
    }

    /// Handle requests whose payload is a `T` (or declares `T` as a base)
    pub fn on<T, R, F, Fut>(mut self, handler: F) -> Self
    where
        T: PayloadType,
        R: PayloadType,
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let result = self.table.on_type(handler);
        self.record(result);
        self
    }

    /// Handle requests addressed to `method`
    pub fn on_method<T, R, F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        T: PayloadType,
        R: PayloadType,
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let result = self.table.on_method(method, handler);
        self.record(result);
        self
    }

    /// Make a payload type known without handling it directly
    pub fn declare<T: PayloadType>(mut self) -> Self {
        let result = self.table.declare::<T>();
        self.record(result);
        self
    }

    pub fn fallback<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Payload>> + Send + 'static,
    {
        self.table.set_fallback(handler);
        self
    }

    /// Build the port; fails if two payload types claimed one block id
    pub fn build(self) -> Result<ServicePort> {
        if let Some(err) = self.error {
            return Err(PortError::misuse(format!(
                "invalid handler table for service '{}': {err}",
                self.name
            )));
        }
        let factory = DriverFactory::new(DriverOptions {
            max_frame_size: self.settings.max_message_size,
            connect_timeout: self.settings.connect_timeout(),
        });
        let inner = Arc::new(ServiceInner {
            id: PortId::new(),
            lifecycle: Lifecycle::new(self.name.clone()),
            name: self.name,
            multithreaded: self.multithreaded,
            factory,
            dispatch: Arc::new(self.table),
            clients: Mutex::new(HashMap::new()),
            binding: Mutex::new(None),
            endpoint: Mutex::new(None),
            uri: Mutex::new(None),
            open_gate: tokio::sync::Mutex::new(()),
        });
        let managed: Weak<dyn ManagedPort> = Arc::downgrade(&inner) as Weak<dyn ManagedPort>;
        PortRegistry::init().register(managed);
        Ok(ServicePort { inner })
    }
}

struct ServiceInner {
    id: PortId,
    name: String,
    multithreaded: bool,
    factory: DriverFactory,
    dispatch: Arc<DispatchTable>,
    lifecycle: Lifecycle,
    clients: Mutex<HashMap<ClientId, Arc<dyn ClientDriver>>>,
    binding: Mutex<Option<ServiceBinding>>,
    endpoint: Mutex<Option<Arc<ServiceEndpoint>>>,
    uri: Mutex<Option<ActorUri>>,
    open_gate: tokio::sync::Mutex<()>,
}

/// Input-side actor port
///
/// Cheap to clone; clones share one endpoint and one handler table.
#[derive(Clone)]
pub struct ServicePort {
    inner: Arc<ServiceInner>,
}

impl fmt::Debug for ServicePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServicePort")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("multithreaded", &self.inner.multithreaded)
            .field("dispatch", &self.inner.dispatch)
            .finish()
    }
}

impl ServicePort {
    pub fn builder(name: impl Into<String>) -> ServicePortBuilder {
        ServicePortBuilder {
            name: name.into(),
            multithreaded: false,
            settings: PortSettings::default(),
            table: DispatchTable::new(),
            error: None,
        }
    }

    pub fn id(&self) -> PortId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_multithreaded(&self) -> bool {
        self.inner.multithreaded
    }

    pub fn state(&self) -> PortState {
        self.inner.lifecycle.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<PortState> {
        self.inner.lifecycle.subscribe()
    }

    /// Bound address; any requested port 0 is resolved
    pub fn uri(&self) -> Option<ActorUri> {
        self.inner.uri.lock().clone()
    }

    pub fn dispatch_table(&self) -> &DispatchTable {
        &self.inner.dispatch
    }

    /// Start accepting connections at `uri`, returning the bound address
    pub async fn open(&self, uri: &ActorUri) -> Result<ActorUri> {
        let inner = &self.inner;
        let _gate = inner.begin_open().await?;

        let endpoint = inner.start_endpoint();
        let sink: Arc<dyn ServiceSink> = endpoint;
        match inner.factory.serve(uri, sink).await {
            Ok(binding) => {
                let bound = binding.uri().clone();
                *inner.binding.lock() = Some(binding);
                *inner.uri.lock() = Some(bound.clone());
                inner.lifecycle.transition(PortState::Ok)?;
                info!(
                    port = %inner.name,
                    uri = %bound,
                    multithreaded = inner.multithreaded,
                    "Service port open"
                );
                Ok(bound)
            }
            Err(err) => {
                inner.stop_endpoint();
                inner.lifecycle.fault(err.to_string());
                warn!(port = %inner.name, uri = %uri, error = %err, "Service port failed to open");
                Err(PortError::connect(uri, err))
            }
        }
    }

    /// Open for in-process links only; no endpoint is published
    pub async fn open_local(&self) -> Result<()> {
        let inner = &self.inner;
        let _gate = inner.begin_open().await?;
        inner.start_endpoint();
        inner.lifecycle.transition(PortState::Ok)?;
        info!(port = %inner.name, "Service port open for in-process links");
        Ok(())
    }

    /// Sink that in-process drivers attach to, while open
    pub(crate) fn local_sink(&self) -> Option<Arc<dyn ServiceSink>> {
        if self.state() != PortState::Ok {
            return None;
        }
        let endpoint = self.inner.endpoint.lock().clone()?;
        Some(endpoint)
    }

    pub fn clients(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.inner.clients.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Send a notification to one client
    pub async fn notify<T: PayloadType>(
        &self,
        client: ClientId,
        method: impl Into<String>,
        payload: T,
    ) -> Result<()> {
        let driver = self
            .inner
            .clients
            .lock()
            .get(&client)
            .cloned()
            .ok_or_else(|| PortError::misuse(format!("{client} is not connected")))?;
        let message =
            Message::notification(method, Payload::local(payload)).with_source(self.inner.name.clone());
        driver.send_to_client(message).await?;
        Ok(())
    }

    /// Send a notification to every client; returns how many received it
    pub async fn notify_all<T: PayloadType>(&self, method: impl Into<String>, payload: T) -> usize {
        let message =
            Message::notification(method, Payload::local(payload)).with_source(self.inner.name.clone());
        self.inner.broadcast(message).await
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

impl ServiceInner {
    async fn begin_open(&self) -> Result<tokio::sync::MutexGuard<'_, ()>> {
        self.lifecycle.ensure_not_disposed()?;
        let gate = self.open_gate.lock().await;
        if matches!(self.lifecycle.state(), PortState::Connecting | PortState::Ok) {
            return Err(PortError::AlreadyOpen);
        }
        self.lifecycle.transition(PortState::Connecting)?;
        Ok(gate)
    }

    fn start_endpoint(self: &Arc<Self>) -> Arc<ServiceEndpoint> {
        let mode = if self.multithreaded {
            WorkerMode::Concurrent
        } else {
            WorkerMode::Sequential
        };
        let endpoint = Arc::new(ServiceEndpoint {
            port: Arc::downgrade(self),
            worker: PortWorker::spawn(self.name.clone(), mode),
        });
        *self.endpoint.lock() = Some(endpoint.clone());
        endpoint
    }

    fn stop_endpoint(&self) {
        if let Some(endpoint) = self.endpoint.lock().take() {
            endpoint.worker.stop();
        }
    }

    async fn serve(self: Arc<Self>, client: ClientId, message: Message) {
        match message.message_type {
            MessageType::Request => {
                let reply = match self.dispatch.invoke(&message).await {
                    Ok(payload) => Message::response_to(&message, payload),
                    Err(err) => {
                        debug!(
                            port = %self.name,
                            request_id = message.request_id,
                            code = %err.code,
                            "Request failed"
                        );
                        Message::error_to(message.request_id, err).with_client(client)
                    }
                }
                .with_source(self.name.clone());

                let driver = self.clients.lock().get(&client).cloned();
                match driver {
                    Some(driver) => {
                        let is_response = reply.message_type == MessageType::Response;
                        let mut outcome = driver.send_to_client(reply).await;
                        if let Err(TransportError::Encode { message: reason }) = &outcome {
                            if is_response {
                                warn!(
                                    port = %self.name,
                                    client = %client,
                                    request_id = message.request_id,
                                    error = %reason,
                                    "Reply cannot be encoded; answering with an error"
                                );
                                let err = RemoteError::unhandled(format!(
                                    "reply could not be encoded: {reason}"
                                ));
                                let fallback = Message::error_to(message.request_id, err)
                                    .with_client(client)
                                    .with_source(self.name.clone());
                                outcome = driver.send_to_client(fallback).await;
                            }
                        }
                        if let Err(err) = outcome {
                            warn!(
                                port = %self.name,
                                client = %client,
                                request_id = message.request_id,
                                error = %err,
                                "Failed to deliver reply"
                            );
                        }
                    }
                    None => debug!(
                        port = %self.name,
                        client = %client,
                        request_id = message.request_id,
                        "Client left before its reply was ready"
                    ),
                }
            }
            MessageType::Notification => {
                if let Err(err) = self.dispatch.invoke(&message).await {
                    warn!(
                        port = %self.name,
                        client = %client,
                        method = %message.destination_method,
                        error = %err,
                        "Notification handler failed"
                    );
                }
            }
            MessageType::Response | MessageType::Error => {
                warn!(
                    port = %self.name,
                    client = %client,
                    request_id = message.request_id,
                    "Unexpected answer sent to a service port; dropping"
                );
            }
        }
    }

    async fn broadcast(&self, message: Message) -> usize {
        let clients: Vec<Arc<dyn ClientDriver>> = self.clients.lock().values().cloned().collect();
        let mut delivered = 0;
        for client in clients {
            match client.send_to_client(message.clone()).await {
                Ok(()) => delivered += 1,
                Err(err) => debug!(
                    port = %self.name,
                    client = %client.client_id(),
                    error = %err,
                    "Notification not delivered"
                ),
            }
        }
        delivered
    }

    async fn disconnect(&self) {
        if matches!(
            self.lifecycle.state(),
            PortState::Unlinked | PortState::Disconnected
        ) {
            return;
        }
        if self.lifecycle.transition(PortState::Disconnected).is_err() {
            return;
        }

        let binding = self.binding.lock().take();
        if let Some(binding) = binding {
            binding.unbind();
        }

        let clients: Vec<Arc<dyn ClientDriver>> =
            self.clients.lock().drain().map(|(_, client)| client).collect();
        let notice = Message::notification(
            String::new(),
            Payload::local(ServiceShutdown {
                service: self.name.clone(),
            }),
        )
        .with_source(self.name.clone());
        for client in &clients {
            if let Err(err) = client.send_to_client(notice.clone()).await {
                debug!(port = %self.name, client = %client.client_id(), error = %err, "Shutdown notice not delivered");
            }
            client.disconnect_from_client().await;
        }

        self.stop_endpoint();
        info!(port = %self.name, clients = clients.len(), "Service port disconnected");
    }
}

#[async_trait]
impl ManagedPort for ServiceInner {
    fn port_id(&self) -> PortId {
        self.id
    }

    fn port_name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> PortRole {
        PortRole::Service
    }

    fn current_state(&self) -> PortState {
        self.lifecycle.state()
    }

    async fn shutdown(&self) {
        self.disconnect().await;
    }
}

impl Drop for ServiceInner {
    fn drop(&mut self) {
        PortRegistry::init().unregister(&self.id);
        if let Some(binding) = self.binding.get_mut().take() {
            binding.unbind();
        }
    }
}

/// Driver-facing side of an open Service Port
struct ServiceEndpoint {
    port: Weak<ServiceInner>,
    worker: PortWorker,
}

impl ServiceSink for ServiceEndpoint {
    fn on_client_connected(&self, client: Arc<dyn ClientDriver>) {
        if let Some(port) = self.port.upgrade() {
            info!(port = %port.name, client = %client.client_id(), peer = %client.peer(), "Client connected");
            port.clients.lock().insert(client.client_id(), client);
        }
    }

    fn on_client_message(&self, client: ClientId, message: Message) {
        if let Some(port) = self.port.upgrade() {
            self.worker.enqueue(port.serve(client, message).boxed());
        }
    }

    fn on_client_disconnected(&self, client: ClientId) {
        if let Some(port) = self.port.upgrade() {
            if port.clients.lock().remove(&client).is_some() {
                info!(port = %port.name, client = %client, "Client disconnected");
            }
        }
    }
}
