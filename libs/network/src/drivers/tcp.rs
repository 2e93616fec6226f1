//! TCP protocol drivers
//!
//! One implementation serves every TCP-based wire format; the codec decides
//! what the frames look like.
//!
//! Decode failures follow one rule on both sides: a frame that revealed its
//! request id is answered with a `DecodeFailure` error addressed to that id
//! and the connection stays up; anything else ends the connection.

use super::{
    next_client_id, ClientDriver, DriverOptions, DriverSink, DriverState, DriverStateCell,
    ServiceDriver, ServiceSink,
};
use crate::transports::listener::ConnectionAcceptor;
use crate::transports::tcp::{self, FrameReader, FrameWriter};
use crate::uri::ActorUri;
use crate::{Result, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use port_codec::{DecodeError, WireCodec};
use port_types::{ClientId, Message, RemoteError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

fn decode_failure_reply(err: &DecodeError) -> Option<Message> {
    err.request_id
        .map(|id| Message::error_to(id, RemoteError::decode_failure(err.reason.clone())))
}

/// Proxy-side TCP driver
pub struct TcpServiceDriver {
    codec: Arc<dyn WireCodec>,
    options: DriverOptions,
    state: Arc<DriverStateCell>,
    writer: AsyncMutex<Option<FrameWriter>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    opened: AtomicBool,
}

impl TcpServiceDriver {
    pub fn new(codec: Arc<dyn WireCodec>, options: DriverOptions) -> Self {
        Self {
            codec,
            options,
            state: Arc::new(DriverStateCell::new()),
            writer: AsyncMutex::new(None),
            read_task: Mutex::new(None),
            opened: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ServiceDriver for TcpServiceDriver {
    async fn open(&self, target: &ActorUri, sink: Arc<dyn DriverSink>) -> Result<()> {
        if self.opened.swap(true, Ordering::AcqRel) {
            return Err(TransportError::closed("driver instances cannot be reopened"));
        }

        let connected = async {
            let addr = target.socket_addr().await?;
            tcp::connect(
                addr,
                target.path(),
                self.options.connect_timeout,
                self.options.max_frame_size,
            )
            .await
        }
        .await;

        let (reader, writer) = match connected {
            Ok(halves) => halves,
            Err(e) => {
                self.state.fault();
                return Err(e);
            }
        };

        info!(
            uri = %target,
            format = self.codec.name(),
            peer = %reader.peer_addr(),
            "Connected to service"
        );
        *self.writer.lock().await = Some(writer);
        let task = tokio::spawn(proxy_read_loop(
            reader,
            self.codec.clone(),
            sink,
            self.state.clone(),
        ));
        *self.read_task.lock() = Some(task);
        self.state.set(DriverState::Ok);
        Ok(())
    }

    async fn send_request(&self, message: Message) -> Result<()> {
        let frame = self.codec.encode(&message)?;
        let mut writer = self.writer.lock().await;
        let writer = writer
            .as_mut()
            .ok_or_else(|| TransportError::closed("driver is not open"))?;
        if let Err(e) = writer.send_frame(&frame).await {
            self.state.fault();
            return Err(e);
        }
        Ok(())
    }

    async fn dispose(&self) {
        self.state.set(DriverState::Disconnected);
        if let Some(task) = self.read_task.lock().take() {
            task.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.shutdown().await;
        }
    }

    fn connection_state(&self) -> DriverState {
        self.state.get()
    }

    fn format_name(&self) -> &'static str {
        self.codec.name()
    }
}

async fn proxy_read_loop(
    mut reader: FrameReader,
    codec: Arc<dyn WireCodec>,
    sink: Arc<dyn DriverSink>,
    state: Arc<DriverStateCell>,
) {
    let peer = reader.peer_addr();
    loop {
        match reader.receive_frame().await {
            Ok(Some(frame)) => match codec.decode(&frame) {
                Ok(message) => sink.on_message(message),
                Err(err) => match decode_failure_reply(&err) {
                    Some(reply) => {
                        warn!(peer = %peer, error = %err, "Undecodable answer, failing its request");
                        sink.on_message(reply);
                    }
                    None => {
                        warn!(peer = %peer, error = %err, "Undecodable frame, faulting driver");
                        state.fault();
                        sink.on_fault(TransportError::protocol_with_source(
                            "Undecodable frame from service",
                            err,
                        ));
                        return;
                    }
                },
            },
            Ok(None) => {
                debug!(peer = %peer, "Service closed the connection");
                state.set(DriverState::Disconnected);
                sink.on_closed();
                return;
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "Connection to service failed");
                state.fault();
                sink.on_fault(e);
                return;
            }
        }
    }
}

/// Service-side driver for one accepted TCP peer
pub struct TcpClientDriver {
    id: ClientId,
    peer: SocketAddr,
    codec: Arc<dyn WireCodec>,
    writer: AsyncMutex<Option<FrameWriter>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl TcpClientDriver {
    fn new(id: ClientId, peer: SocketAddr, codec: Arc<dyn WireCodec>, writer: FrameWriter) -> Self {
        Self {
            id,
            peer,
            codec,
            writer: AsyncMutex::new(Some(writer)),
            read_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ClientDriver for TcpClientDriver {
    fn client_id(&self) -> ClientId {
        self.id
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }

    async fn send_to_client(&self, message: Message) -> Result<()> {
        let frame = self.codec.encode(&message)?;
        let mut writer = self.writer.lock().await;
        let writer = writer
            .as_mut()
            .ok_or_else(|| TransportError::closed(format!("{} is disconnected", self.id)))?;
        writer.send_frame(&frame).await
    }

    async fn disconnect_from_client(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.read_task.lock().take() {
            task.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.shutdown().await;
        }
        debug!(client = %self.id, peer = %self.peer, "Client disconnected by service");
    }
}

/// Hands connections accepted on a shared listener to one Service Port
pub struct TcpServiceHost {
    codec: Arc<dyn WireCodec>,
    sink: Arc<dyn ServiceSink>,
}

impl TcpServiceHost {
    pub fn new(codec: Arc<dyn WireCodec>, sink: Arc<dyn ServiceSink>) -> Self {
        Self { codec, sink }
    }
}

impl ConnectionAcceptor for TcpServiceHost {
    fn accept(&self, reader: FrameReader, writer: FrameWriter) {
        let id = next_client_id();
        let driver = Arc::new(TcpClientDriver::new(
            id,
            reader.peer_addr(),
            self.codec.clone(),
            writer,
        ));
        info!(client = %id, peer = %reader.peer_addr(), format = self.codec.name(), "Client connected");
        self.sink.on_client_connected(driver.clone());

        let task = tokio::spawn(service_read_loop(reader, driver.clone(), self.sink.clone()));
        *driver.read_task.lock() = Some(task);
    }
}

async fn service_read_loop(
    mut reader: FrameReader,
    driver: Arc<TcpClientDriver>,
    sink: Arc<dyn ServiceSink>,
) {
    let id = driver.id;
    loop {
        match reader.receive_frame().await {
            Ok(Some(frame)) => match driver.codec.decode(&frame) {
                Ok(message) => sink.on_client_message(id, message.with_client(id)),
                Err(err) => match decode_failure_reply(&err) {
                    Some(reply) => {
                        warn!(client = %id, error = %err, "Undecodable request, answering with error");
                        if let Err(e) = driver.send_to_client(reply.with_client(id)).await {
                            warn!(client = %id, error = %e, "Failed to send decode failure");
                            break;
                        }
                    }
                    None => {
                        warn!(client = %id, error = %err, "Undecodable frame, dropping client");
                        break;
                    }
                },
            },
            Ok(None) => {
                debug!(client = %id, "Client closed the connection");
                break;
            }
            Err(e) => {
                warn!(client = %id, error = %e, "Client connection failed");
                break;
            }
        }
    }

    if !driver.closed.swap(true, Ordering::AcqRel) {
        driver.read_task.lock().take();
        if let Some(mut writer) = driver.writer.lock().await.take() {
            writer.shutdown().await;
        }
        sink.on_client_disconnected(id);
    }
}
