//! Port Configuration Module
//!
//! Loads [`PortConfig`] from TOML files with environment-specific overrides.
//! Every section and key has a default, so an empty file (or no file at
//! all) yields a working configuration.

use crate::defaults;
use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PortConfig {
    /// Actor port behaviour
    pub port: PortSettings,

    /// Catalog client and service settings
    pub catalog: CatalogSettings,

    /// Logging output
    pub logging: LoggingSettings,
}

/// Actor port settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct PortSettings {
    /// Sends buffered while connecting; 0 disables queuing
    pub send_queue_depth: usize,
    pub max_message_size: usize,
    pub connect_timeout_ms: u64,
    pub request_id_width_bits: u32,
}

/// Catalog settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct CatalogSettings {
    /// Catalog service address; catalog lookups are disabled when unset
    pub uri: Option<String>,
    pub refresh_interval_secs: u64,
    pub entry_timeout_secs: u64,
    pub max_hop_count: u8,
    /// Peer catalogs that accepted publications are forwarded to
    pub peers: Vec<String>,
}

/// Logging settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            send_queue_depth: defaults::port::SEND_QUEUE_DEPTH,
            max_message_size: defaults::port::MAX_MESSAGE_SIZE,
            connect_timeout_ms: defaults::port::CONNECT_TIMEOUT_MS,
            request_id_width_bits: defaults::port::REQUEST_ID_WIDTH_BITS,
        }
    }
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            uri: None,
            refresh_interval_secs: defaults::catalog::REFRESH_INTERVAL_SECS,
            entry_timeout_secs: defaults::catalog::ENTRY_TIMEOUT_SECS,
            max_hop_count: defaults::catalog::MAX_HOP_COUNT,
            peers: Vec::new(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: defaults::logging::LEVEL.to_string(),
            json: false,
        }
    }
}

impl PortSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Largest request id before the counter wraps
    pub fn max_request_id(&self) -> u32 {
        let bits = self.request_id_width_bits.clamp(1, 32);
        u32::MAX >> (32 - bits)
    }
}

impl CatalogSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn entry_timeout(&self) -> Duration {
        Duration::from_secs(self.entry_timeout_secs)
    }
}

impl PortConfig {
    /// Load configuration from files with environment overrides
    ///
    /// An explicit `base_path` must exist; the default path is optional.
    /// Environment files are looked up in `environments/` next to the base
    /// file.
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        let (base, required) = match base_path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(defaults::CONFIG_FILE), false),
        };

        let mut builder = Config::builder().add_source(File::from(base.as_path()).required(required));

        if let Some(env) = environment {
            let env_file = base
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("environments")
                .join(format!("{env}.toml"));

            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        // Override with environment variables (PORTS_ prefix)
        builder = builder.add_source(
            Environment::with_prefix(defaults::ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: PortConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        debug!(?config, "Configuration loaded");
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: PortConfig = toml::from_str(text).context("Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Reject values no port can run with
    pub fn validate(&self) -> Result<()> {
        let bits = self.port.request_id_width_bits;
        if !(8..=32).contains(&bits) {
            bail!("port.request_id_width_bits must be between 8 and 32, got {bits}");
        }
        if self.port.max_message_size == 0 {
            bail!("port.max_message_size must be positive");
        }
        if self.catalog.refresh_interval_secs == 0 {
            bail!("catalog.refresh_interval_secs must be positive");
        }
        if self.catalog.entry_timeout_secs < self.catalog.refresh_interval_secs {
            warn!(
                entry_timeout_secs = self.catalog.entry_timeout_secs,
                refresh_interval_secs = self.catalog.refresh_interval_secs,
                "Catalog entries expire before they are refreshed"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = PortConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port.send_queue_depth, 64);
        assert_eq!(config.port.max_request_id(), u32::MAX);
        assert_eq!(config.catalog.entry_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn test_load_base_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("ports.toml");

        let config_content = r#"
[port]
send_queue_depth = 8
connect_timeout_ms = 250

[catalog]
uri = "tcp://127.0.0.1:7000/catalog/directory"

[logging]
level = "debug"
"#;
        fs::write(&config_path, config_content).unwrap();

        let config = PortConfig::load(Some(&config_path), None).unwrap();
        assert_eq!(config.port.send_queue_depth, 8);
        assert_eq!(config.port.connect_timeout(), Duration::from_millis(250));
        assert_eq!(config.port.max_message_size, defaults::port::MAX_MESSAGE_SIZE);
        assert_eq!(
            config.catalog.uri.as_deref(),
            Some("tcp://127.0.0.1:7000/catalog/directory")
        );
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_environment_override() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("ports.toml");
        fs::write(&config_path, "[logging]\nlevel = \"info\"\n").unwrap();

        let env_dir = dir.path().join("environments");
        fs::create_dir_all(&env_dir).unwrap();
        fs::write(env_dir.join("staging.toml"), "[logging]\njson = true\nlevel = \"warn\"\n").unwrap();

        let config = PortConfig::load(Some(&config_path), Some("staging")).unwrap();
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "warn");

        let plain = PortConfig::load(Some(&config_path), Some("missing")).unwrap();
        assert!(!plain.logging.json);
    }

    #[test]
    fn test_env_var_override() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("ports.toml");
        fs::write(&config_path, "").unwrap();

        std::env::set_var("PORTS_CATALOG__MAX_HOP_COUNT", "7");
        let config = PortConfig::load(Some(&config_path), None);
        std::env::remove_var("PORTS_CATALOG__MAX_HOP_COUNT");

        assert_eq!(config.unwrap().catalog.max_hop_count, 7);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(PortConfig::load(Some(&missing), None).is_err());
    }

    #[test]
    fn test_invalid_width_rejected() {
        let err = PortConfig::from_toml_str("[port]\nrequest_id_width_bits = 40\n").unwrap_err();
        assert!(err.to_string().contains("request_id_width_bits"));
    }

    #[test]
    fn test_max_request_id_never_overflows() {
        let width = |bits| PortSettings {
            request_id_width_bits: bits,
            ..PortSettings::default()
        };
        assert_eq!(width(8).max_request_id(), 255);
        assert_eq!(width(16).max_request_id(), u16::MAX as u32);
        assert_eq!(width(32).max_request_id(), u32::MAX);
        // unvalidated settings are clamped instead of overflowing the shift
        assert_eq!(width(40).max_request_id(), u32::MAX);
        assert_eq!(width(0).max_request_id(), 1);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = PortConfig::default();
        config.catalog.peers = vec!["tcp://10.0.0.2:7000/catalog/directory".to_string()];
        let text = config.to_toml_string().unwrap();
        assert_eq!(PortConfig::from_toml_str(&text).unwrap(), config);
    }
}
