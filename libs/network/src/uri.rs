//! Connection URIs
//!
//! `scheme://host:port/namespace/serviceName`. The scheme selects the
//! protocol driver; the path identifies the Service Port on a shared
//! listener, and its last segment is the service name.
//!
//! | Scheme     | Driver                          |
//! |------------|---------------------------------|
//! | `tcp`      | TCP transport, binary block codec |
//! | `jsonrpc`  | TCP transport, JSON-RPC codec   |
//! | `local`    | in-process, no serialization    |

use crate::{Result, TransportError};
use port_codec::WireFormat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use url::Url;

/// Protocol driver selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Tcp,
    JsonRpc,
    Local,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Tcp => "tcp",
            Scheme::JsonRpc => "jsonrpc",
            Scheme::Local => "local",
        }
    }

    /// Wire format used by network schemes
    pub fn wire_format(self) -> Option<WireFormat> {
        match self {
            Scheme::Tcp => Some(WireFormat::Block),
            Scheme::JsonRpc => Some(WireFormat::JsonRpc),
            Scheme::Local => None,
        }
    }
}

impl FromStr for Scheme {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Scheme::Tcp),
            "jsonrpc" => Ok(Scheme::JsonRpc),
            "local" => Ok(Scheme::Local),
            other => Err(TransportError::configuration(
                format!("Unsupported URI scheme '{other}'"),
                Some("scheme"),
            )),
        }
    }
}

/// Address of a Service Port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActorUri {
    scheme: Scheme,
    host: String,
    port: u16,
    path: String,
}

impl ActorUri {
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input).map_err(|e| {
            TransportError::configuration(format!("Invalid URI '{input}': {e}"), Some("uri"))
        })?;
        let scheme = Scheme::from_str(url.scheme())?;
        let host = url.host_str().unwrap_or("localhost").to_string();

        let port = match (scheme, url.port()) {
            (_, Some(port)) => port,
            (Scheme::Local, None) => 0,
            (_, None) => {
                return Err(TransportError::configuration(
                    format!("URI '{input}' has no port"),
                    Some("port"),
                ))
            }
        };

        let path = url.path().trim_end_matches('/').to_string();
        if path.is_empty() {
            return Err(TransportError::configuration(
                format!("URI '{input}' has no service path"),
                Some("path"),
            ));
        }

        Ok(Self {
            scheme,
            host,
            port,
            path,
        })
    }

    /// In-process address for a service path
    pub fn local(path: &str) -> Self {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        Self {
            scheme: Scheme::Local,
            host: "localhost".to_string(),
            port: 0,
            path,
        }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path used for port-sharing lookup, always starting with `/`
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment
    pub fn service_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    /// `host:port` for socket operations
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolve the authority to a socket address
    pub async fn socket_addr(&self) -> Result<SocketAddr> {
        let authority = self.authority();
        let mut addrs = tokio::net::lookup_host(&authority)
            .await
            .map_err(|e| TransportError::network_with_source(format!("Failed to resolve {authority}"), e))?;
        addrs
            .next()
            .ok_or_else(|| TransportError::network(format!("No addresses for {authority}")))
    }

    /// Same address with the port replaced, used once a port-0 bind resolves
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }
}

impl fmt::Display for ActorUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scheme {
            Scheme::Local => write!(f, "local://{}{}", self.host, self.path),
            scheme => write!(f, "{}://{}:{}{}", scheme.as_str(), self.host, self.port, self.path),
        }
    }
}

impl FromStr for ActorUri {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ActorUri {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ActorUri {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
