//! Default configuration values
//!
//! Shared by the serde defaults in [`crate::port_config`] and by code that
//! builds ports without loading a file.

/// Actor port defaults
pub mod port {
    /// Sends buffered while a proxy is still connecting
    pub const SEND_QUEUE_DEPTH: usize = 64;

    /// Largest frame accepted or produced by a driver (16 MiB)
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

    /// Connection timeout (milliseconds)
    pub const CONNECT_TIMEOUT_MS: u64 = 5_000;

    /// Request id counter width; ids wrap after `2^width - 1`
    pub const REQUEST_ID_WIDTH_BITS: u32 = 32;
}

/// Catalog defaults
pub mod catalog {
    /// Well-known catalog service path
    pub const SERVICE_PATH: &str = "/catalog/directory";

    /// Client re-publish interval (seconds)
    pub const REFRESH_INTERVAL_SECS: u64 = 30;

    /// Entry lifetime without a refresh (seconds)
    pub const ENTRY_TIMEOUT_SECS: u64 = 90;

    /// Federation hops before an entry stops being forwarded
    pub const MAX_HOP_COUNT: u8 = 4;
}

/// Logging defaults
pub mod logging {
    pub const LEVEL: &str = "info";
}

/// Base configuration file used when no path is given
pub const CONFIG_FILE: &str = "config/ports.toml";

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "PORTS";
