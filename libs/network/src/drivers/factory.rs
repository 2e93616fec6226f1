//! Driver factory keyed by URI scheme

use super::local::{LocalEndpoints, LocalServiceDriver};
use super::tcp::{TcpServiceDriver, TcpServiceHost};
use super::{DriverOptions, ServiceDriver, ServiceSink};
use crate::transports::listener::ListenerRegistry;
use crate::uri::{ActorUri, Scheme};
use crate::Result;
use std::sync::Arc;
use tracing::info;

/// Creates proxy-side drivers and binds service endpoints
#[derive(Debug, Clone, Default)]
pub struct DriverFactory {
    options: DriverOptions,
}

impl DriverFactory {
    pub fn new(options: DriverOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Fresh, unopened driver for `uri`'s scheme
    pub fn create_service_driver(&self, uri: &ActorUri) -> Arc<dyn ServiceDriver> {
        match uri.scheme().wire_format() {
            Some(format) => Arc::new(TcpServiceDriver::new(
                codec_for(format, self.options.max_frame_size),
                self.options.clone(),
            )),
            None => Arc::new(LocalServiceDriver::new()),
        }
    }

    /// Start accepting connections for a Service Port at `uri`
    pub async fn serve(&self, uri: &ActorUri, sink: Arc<dyn ServiceSink>) -> Result<ServiceBinding> {
        let bound = match uri.scheme().wire_format() {
            Some(format) => {
                let host = TcpServiceHost::new(codec_for(format, self.options.max_frame_size), sink);
                ListenerRegistry::init()
                    .bind(uri, Arc::new(host), self.options.max_frame_size)
                    .await?
            }
            None => LocalEndpoints::init().bind(uri, sink)?,
        };
        info!(uri = %bound, "Service endpoint bound");
        Ok(ServiceBinding { uri: bound })
    }
}

fn codec_for(format: port_codec::WireFormat, max_frame_size: usize) -> Arc<dyn port_codec::WireCodec> {
    match format {
        port_codec::WireFormat::Block => Arc::new(port_codec::BlockCodec::with_max_frame_size(max_frame_size)),
        port_codec::WireFormat::JsonRpc => format.codec(),
    }
}

/// A bound service endpoint; unbinding stops new connections
#[derive(Debug, Clone)]
pub struct ServiceBinding {
    uri: ActorUri,
}

impl ServiceBinding {
    /// Actual address, with any requested port 0 resolved
    pub fn uri(&self) -> &ActorUri {
        &self.uri
    }

    pub fn unbind(&self) -> bool {
        match self.uri.scheme() {
            Scheme::Local => LocalEndpoints::init().unbind(&self.uri),
            Scheme::Tcp | Scheme::JsonRpc => ListenerRegistry::init().unbind(&self.uri),
        }
    }
}
