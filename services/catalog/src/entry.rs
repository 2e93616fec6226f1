//! Catalog Entries and Catalog Protocol Payloads
//!
//! Every type here travels both as a JSON tree and as a block. Block ids live
//! in the `0x0200` range; fields are written in declaration order.

use port_network::ActorUri;
use port_types::{BlockError, BlockReader, BlockWriter, PayloadType};
use serde::{Deserialize, Serialize};

/// Block-type ids of the catalog protocol
pub mod block_ids {
    pub const ENTRY: u16 = 0x0200;
    pub const PUBLISH: u16 = 0x0201;
    pub const UNPUBLISH: u16 = 0x0202;
    pub const RESOLVE: u16 = 0x0203;
    pub const RESOLVED: u16 = 0x0204;
    pub const LIST: u16 = 0x0205;
    pub const ENTRY_LIST: u16 = 0x0206;
}

/// One published service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    /// Logical name proxies link by
    pub name: String,
    pub app_name: String,
    pub app_instance: String,
    pub process_id: u32,
    pub version: String,
    pub host_name: String,
    /// Connection URI of the service port
    pub uri: String,
    /// Alternative addresses of the same host
    pub address_list: Vec<String>,
    /// Lifetime without a refresh; 0 means the catalog's default
    pub timeout_seconds: u32,
    /// Federation hops this copy has travelled
    pub hop_count: u8,
}

impl CatalogEntry {
    /// Entry for a service port of this process
    pub fn new(name: impl Into<String>, uri: &ActorUri) -> Self {
        let app_name = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
            .unwrap_or_default();
        Self {
            name: name.into(),
            app_name,
            app_instance: String::new(),
            process_id: std::process::id(),
            version: String::new(),
            host_name: uri.host().to_string(),
            uri: uri.to_string(),
            address_list: Vec::new(),
            timeout_seconds: 0,
            hop_count: 0,
        }
    }

    pub fn with_app(mut self, app_name: impl Into<String>, app_instance: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self.app_instance = app_instance.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_addresses(mut self, addresses: Vec<String>) -> Self {
        self.address_list = addresses;
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: u32) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn actor_uri(&self) -> Result<ActorUri, port_network::TransportError> {
        ActorUri::parse(&self.uri)
    }

    fn write_fields(&self, w: &mut BlockWriter) -> Result<(), BlockError> {
        w.write_str("name", &self.name)?;
        w.write_str("app_name", &self.app_name)?;
        w.write_str("app_instance", &self.app_instance)?;
        w.write_u32(self.process_id);
        w.write_str("version", &self.version)?;
        w.write_str("host_name", &self.host_name)?;
        w.write_str("uri", &self.uri)?;
        w.write_str_list("address_list", &self.address_list)?;
        w.write_u32(self.timeout_seconds);
        w.write_u8(self.hop_count);
        Ok(())
    }

    fn read_fields(r: &mut BlockReader<'_>) -> Result<Self, BlockError> {
        Ok(Self {
            name: r.read_str("name")?,
            app_name: r.read_str("app_name")?,
            app_instance: r.read_str("app_instance")?,
            process_id: r.read_u32("process_id")?,
            version: r.read_str("version")?,
            host_name: r.read_str("host_name")?,
            uri: r.read_str("uri")?,
            address_list: r.read_str_list("address_list")?,
            timeout_seconds: r.read_u32("timeout_seconds")?,
            hop_count: r.read_u8("hop_count")?,
        })
    }
}

impl PayloadType for CatalogEntry {
    const TYPE_NAME: &'static str = "CatalogEntry";
    const BLOCK_TYPE: Option<u16> = Some(block_ids::ENTRY);

    fn write_block(&self, w: &mut BlockWriter) -> Result<(), BlockError> {
        self.write_fields(w)
    }

    fn read_block(r: &mut BlockReader<'_>) -> Result<Self, BlockError> {
        Self::read_fields(r)
    }
}

/// Add or refresh an entry; answered with `true` when stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publish {
    pub entry: CatalogEntry,
}

impl PayloadType for Publish {
    const TYPE_NAME: &'static str = "Publish";
    const BLOCK_TYPE: Option<u16> = Some(block_ids::PUBLISH);

    fn write_block(&self, w: &mut BlockWriter) -> Result<(), BlockError> {
        self.entry.write_fields(w)
    }

    fn read_block(r: &mut BlockReader<'_>) -> Result<Self, BlockError> {
        Ok(Self {
            entry: CatalogEntry::read_fields(r)?,
        })
    }
}

/// Remove an entry; answered with `true` when one was removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unpublish {
    pub name: String,
}

impl PayloadType for Unpublish {
    const TYPE_NAME: &'static str = "Unpublish";
    const BLOCK_TYPE: Option<u16> = Some(block_ids::UNPUBLISH);

    fn write_block(&self, w: &mut BlockWriter) -> Result<(), BlockError> {
        w.write_str("name", &self.name)
    }

    fn read_block(r: &mut BlockReader<'_>) -> Result<Self, BlockError> {
        Ok(Self {
            name: r.read_str("name")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolve {
    pub name: String,
}

impl PayloadType for Resolve {
    const TYPE_NAME: &'static str = "Resolve";
    const BLOCK_TYPE: Option<u16> = Some(block_ids::RESOLVE);

    fn write_block(&self, w: &mut BlockWriter) -> Result<(), BlockError> {
        w.write_str("name", &self.name)
    }

    fn read_block(r: &mut BlockReader<'_>) -> Result<Self, BlockError> {
        Ok(Self {
            name: r.read_str("name")?,
        })
    }
}

/// Answer to [`Resolve`]; `None` when the name is unknown or expired
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolved {
    pub entry: Option<CatalogEntry>,
}

impl PayloadType for Resolved {
    const TYPE_NAME: &'static str = "Resolved";
    const BLOCK_TYPE: Option<u16> = Some(block_ids::RESOLVED);

    fn write_block(&self, w: &mut BlockWriter) -> Result<(), BlockError> {
        match &self.entry {
            Some(entry) => {
                w.write_bool(true);
                entry.write_fields(w)
            }
            None => {
                w.write_bool(false);
                Ok(())
            }
        }
    }

    fn read_block(r: &mut BlockReader<'_>) -> Result<Self, BlockError> {
        let entry = if r.read_bool("found")? {
            Some(CatalogEntry::read_fields(r)?)
        } else {
            None
        };
        Ok(Self { entry })
    }
}

/// List live entries whose name starts with `prefix` (empty lists all)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntries {
    pub prefix: String,
}

impl PayloadType for ListEntries {
    const TYPE_NAME: &'static str = "ListEntries";
    const BLOCK_TYPE: Option<u16> = Some(block_ids::LIST);

    fn write_block(&self, w: &mut BlockWriter) -> Result<(), BlockError> {
        w.write_str("prefix", &self.prefix)
    }

    fn read_block(r: &mut BlockReader<'_>) -> Result<Self, BlockError> {
        Ok(Self {
            prefix: r.read_str("prefix")?,
        })
    }
}

/// Answer to [`ListEntries`], sorted by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryList {
    pub entries: Vec<CatalogEntry>,
}

impl PayloadType for EntryList {
    const TYPE_NAME: &'static str = "EntryList";
    const BLOCK_TYPE: Option<u16> = Some(block_ids::ENTRY_LIST);

    fn write_block(&self, w: &mut BlockWriter) -> Result<(), BlockError> {
        let count = u32::try_from(self.entries.len()).map_err(|_| BlockError::TooLong {
            field: "entries",
            len: self.entries.len(),
            max: u32::MAX as usize,
        })?;
        w.write_u32(count);
        for entry in &self.entries {
            entry.write_fields(w)?;
        }
        Ok(())
    }

    fn read_block(r: &mut BlockReader<'_>) -> Result<Self, BlockError> {
        let count = r.read_u32("entries")?;
        let entries = (0..count)
            .map(|_| CatalogEntry::read_fields(r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }
}
