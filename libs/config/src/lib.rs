//! # Port Configuration
//!
//! Layered configuration for actor ports and the catalog, plus the one place
//! that installs a `tracing` subscriber.
//!
//! ## Layers (later wins)
//!
//! 1. Built-in defaults ([`defaults`])
//! 2. Base TOML file (`config/ports.toml` unless given)
//! 3. `environments/<env>.toml` next to the base file
//! 4. `PORTS_`-prefixed environment variables, `__` between section and key
//!    (`PORTS_PORT__SEND_QUEUE_DEPTH=8`)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use port_config::{init_logging, PortConfig};
//!
//! let config = PortConfig::load(None, Some("production")).unwrap();
//! init_logging(&config.logging);
//! ```

pub mod defaults;
pub mod logging;
pub mod port_config;

pub use logging::{init_logging, init_test_logging};
pub use port_config::{CatalogSettings, LoggingSettings, PortConfig, PortSettings};
