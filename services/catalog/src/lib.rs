//! # Port Catalog - Name Directory for Actor Ports
//!
//! ## Purpose
//!
//! Lets proxies link to a service by logical name instead of by address.
//! Services publish a [`CatalogEntry`] describing where they listen; proxies
//! resolve the name when they connect. Catalogs can be federated: accepted
//! publications are forwarded to peer catalogs, and the hop count carried
//! by every copy stops forwarding loops.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐  Publish/Resolve  ┌──────────────────┐  Publish (hop+1)  ┌──────────────┐
//! │ CatalogClient  │──────────────────►│  CatalogService  │──────────────────►│ peer catalog │
//! │ (ProxyPort)    │◄──────────────────│  (ServicePort)   │                   └──────────────┘
//! └───────┬────────┘   entry / bool    │  CatalogStore    │
//!         │ NameResolver               └──────────────────┘
//!         ▼
//!   ProxyPort::link(LinkTarget::Name(..))
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use port_catalog::{CatalogClient, CatalogEntry, CatalogService};
//! use port_config::CatalogSettings;
//! use port_network::ActorUri;
//!
//! # async fn run() -> port_catalog::Result<()> {
//! let catalog = CatalogService::new("catalog", &CatalogSettings::default())?;
//! let uri = catalog
//!     .open(&ActorUri::parse("tcp://127.0.0.1:7400/catalog/directory").unwrap())
//!     .await?;
//!
//! let client = CatalogClient::new("pricing-publisher");
//! client.connect(uri).await?;
//! let pricing = ActorUri::parse("tcp://127.0.0.1:7000/markets/pricing").unwrap();
//! client.publish(CatalogEntry::new("pricing", &pricing)).await?;
//! let _refresh = client.spawn_refresh(std::time::Duration::from_secs(30));
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod entry;
pub mod error;
pub mod service;
pub mod store;

pub use client::{CatalogClient, RefreshTask};
pub use entry::{CatalogEntry, EntryList, ListEntries, Publish, Resolve, Resolved, Unpublish};
pub use error::{CatalogError, Result};
pub use service::{CatalogService, INVALID_ENTRY};
pub use store::{Accepted, CatalogStore};
