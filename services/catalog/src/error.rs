//! Error types for the catalog service and client

use port_actors::PortError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("Port error: {0}")]
    Port(#[from] PortError),

    #[error("Invalid catalog entry '{name}': {reason}")]
    InvalidEntry { name: String, reason: String },

    #[error("No catalog configured")]
    NotConfigured,

    #[error("Catalog address '{uri}' is invalid: {reason}")]
    InvalidUri { uri: String, reason: String },
}

impl CatalogError {
    pub fn invalid_entry(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEntry {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
