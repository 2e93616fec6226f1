//! # Port Actors - Proxy and Service Ports
//!
//! ## Purpose
//!
//! The public endpoint types of the framework. A [`ServicePort`] exposes a
//! handler table; a [`ProxyPort`] links to one service and sends it requests
//! and notifications. Both share one connection lifecycle and talk to the
//! wire only through the protocol-driver traits in `port-network`, so the
//! same code runs in-process, over the block format or over JSON-RPC.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐                 ┌──────────────────────────┐
//! │        ProxyPort         │                 │       ServicePort        │
//! │                          │   ServiceDriver │                          │
//! │  Lifecycle (watch)       │────────────────►│  ServiceEndpoint (sink)  │
//! │  CorrelationTable        │                 │  PortWorker (one queue)  │
//! │  send queue (bounded)    │◄────────────────│  DispatchTable           │
//! │                          │   ClientDriver  │                          │
//! └──────────────────────────┘                 └──────────────────────────┘
//!               └──────────── PortRegistry (bulk shutdown) ────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use port_actors::{ProxyPort, ServicePort};
//!
//! # async fn run() -> port_actors::Result<()> {
//! let service = ServicePort::builder("greeter")
//!     .on_method("greet", |name: String, _ctx| async move { Ok(format!("hello {name}")) })
//!     .build()?;
//! service.open_local().await?;
//!
//! let proxy = ProxyPort::new("greeter-client");
//! proxy.connect_to(&service).await?;
//! let reply: String = proxy.request("greet", "ada".to_string()).await?;
//! assert_eq!(reply, "hello ada");
//! # Ok(())
//! # }
//! ```

pub mod correlation;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod proxy;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod worker;

pub use correlation::{CorrelationTable, PendingOperation};
pub use dispatch::{to_remote_error, DispatchTable, RequestContext, Route};
pub use error::{PortError, Result};
pub use lifecycle::{Lifecycle, PortState};
pub use proxy::{LinkTarget, ProxyPort, ProxyPortBuilder};
pub use registry::{ManagedPort, PortId, PortInfo, PortRegistry, PortRole};
pub use resolver::{NameResolver, StaticResolver};
pub use service::{ServicePort, ServicePortBuilder};
pub use worker::{PortWorker, WorkerMode};

/// Disconnect every live port, then release shared listeners and local endpoints
pub async fn shutdown_all() {
    PortRegistry::init().disconnect_all().await;
    port_network::shutdown_all();
}
