//! # Block Type Registry
//!
//! ## Purpose
//!
//! Maps block-type ids to payload type names (and their declared base types)
//! for one dispatch table. Block payloads only carry the numeric id on the
//! wire, so the receiving side consults this registry to learn which type a
//! frame holds before choosing a handler.
//!
//! ## Integration Points
//!
//! - **Service dispatch**: resolves a block id to a type name, then walks
//!   the base-type chain when no handler is registered for the exact type
//! - **Startup validation**: two types claiming one id is a configuration
//!   error reported when the table is built, never on the hot path
//!
//! ## Architecture Role
//!
//! ```text
//! PayloadType impls → [Block Type Registry] → Dispatch Table
//!        ↑                    ↓                      ↓
//!   BLOCK_TYPE const     id → type name        base-type chain
//! ```

use crate::error::{CodecError, CodecResult};
use port_types::{block_types, PayloadType, RemoteError, ServiceShutdown};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTypeInfo {
    pub block_type: u16,
    pub type_name: &'static str,
    pub base_type: Option<&'static str>,
}

/// Registry of block-capable payload types
#[derive(Debug, Clone)]
pub struct BlockTypeRegistry {
    by_id: HashMap<u16, BlockTypeInfo>,
    by_name: HashMap<&'static str, u16>,
}

impl Default for BlockTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockTypeRegistry {
    /// Registry pre-populated with the framework's own payload types
    pub fn new() -> Self {
        let mut registry = Self {
            by_id: HashMap::new(),
            by_name: HashMap::new(),
        };
        registry.insert_framework::<RemoteError>();
        registry.insert_framework::<ServiceShutdown>();
        registry.insert_framework::<()>();
        registry.insert_framework::<bool>();
        registry.insert_framework::<i32>();
        registry.insert_framework::<i64>();
        registry.insert_framework::<u32>();
        registry.insert_framework::<u64>();
        registry.insert_framework::<f64>();
        registry.insert_framework::<String>();
        registry.insert_framework::<Vec<u8>>();
        registry
    }

    fn insert_framework<T: PayloadType>(&mut self) {
        if let Some(block_type) = T::BLOCK_TYPE {
            self.insert(BlockTypeInfo {
                block_type,
                type_name: T::TYPE_NAME,
                base_type: T::BASE_TYPE,
            });
        }
    }

    fn insert(&mut self, info: BlockTypeInfo) {
        self.by_name.insert(info.type_name, info.block_type);
        self.by_id.insert(info.block_type, info);
    }

    /// Register an application payload type
    ///
    /// Types without a block encoding are accepted and ignored. Registering
    /// the same type twice is a no-op.
    pub fn register<T: PayloadType>(&mut self) -> CodecResult<()> {
        let Some(block_type) = T::BLOCK_TYPE else {
            return Ok(());
        };

        if let Some(existing) = self.by_id.get(&block_type) {
            if existing.type_name == T::TYPE_NAME {
                return Ok(());
            }
            return Err(CodecError::DuplicateBlockType {
                block_type,
                existing: existing.type_name.to_string(),
                requested: T::TYPE_NAME.to_string(),
            });
        }
        if block_types::is_reserved(block_type) {
            return Err(CodecError::ReservedBlockType {
                block_type,
                type_name: T::TYPE_NAME.to_string(),
            });
        }

        self.insert(BlockTypeInfo {
            block_type,
            type_name: T::TYPE_NAME,
            base_type: T::BASE_TYPE,
        });
        Ok(())
    }

    pub fn type_name(&self, block_type: u16) -> Option<&'static str> {
        self.by_id.get(&block_type).map(|info| info.type_name)
    }

    pub fn block_type(&self, type_name: &str) -> Option<u16> {
        self.by_name.get(type_name).copied()
    }

    pub fn info(&self, block_type: u16) -> Option<&BlockTypeInfo> {
        self.by_id.get(&block_type)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use port_types::{BlockError, BlockReader, BlockWriter};
    use serde::{Deserialize, Serialize};

    macro_rules! block_payload {
        ($name:ident, $id:expr, $base:expr) => {
            #[derive(Debug, Clone, Serialize, Deserialize)]
            struct $name;

            impl PayloadType for $name {
                const TYPE_NAME: &'static str = stringify!($name);
                const BASE_TYPE: Option<&'static str> = $base;
                const BLOCK_TYPE: Option<u16> = $id;

                fn write_block(&self, _w: &mut BlockWriter) -> Result<(), BlockError> {
                    Ok(())
                }

                fn read_block(_r: &mut BlockReader<'_>) -> Result<Self, BlockError> {
                    Ok($name)
                }
            }
        };
    }

    block_payload!(Shape, Some(0x0300), None);
    block_payload!(Circle, Some(0x0301), Some("Shape"));
    block_payload!(Square, Some(0x0301), Some("Shape"));
    block_payload!(Sneaky, Some(0x0050), None);
    block_payload!(TextOnly, None, None);

    #[test]
    fn test_framework_types_preloaded() {
        let registry = BlockTypeRegistry::new();
        assert_eq!(registry.type_name(block_types::REMOTE_ERROR), Some("RemoteError"));
        assert_eq!(registry.block_type("u64"), Some(block_types::U64));
    }

    #[test]
    fn test_unit_registers_on_the_empty_id() {
        let mut registry = BlockTypeRegistry::new();
        assert_eq!(registry.type_name(block_types::EMPTY), Some("unit"));
        registry.register::<()>().unwrap();
    }

    #[test]
    fn test_register_and_resolve_base() {
        let mut registry = BlockTypeRegistry::new();
        registry.register::<Shape>().unwrap();
        registry.register::<Circle>().unwrap();
        registry.register::<Circle>().unwrap();

        let info = registry.info(0x0301).unwrap();
        assert_eq!(info.type_name, "Circle");
        assert_eq!(info.base_type, Some("Shape"));
        assert_eq!(registry.block_type("Shape"), Some(0x0300));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut registry = BlockTypeRegistry::new();
        registry.register::<Circle>().unwrap();
        assert!(matches!(
            registry.register::<Square>(),
            Err(CodecError::DuplicateBlockType { block_type: 0x0301, .. })
        ));
    }

    #[test]
    fn test_reserved_id_rejected() {
        let mut registry = BlockTypeRegistry::new();
        assert!(matches!(
            registry.register::<Sneaky>(),
            Err(CodecError::ReservedBlockType { .. })
        ));
    }

    #[test]
    fn test_tree_only_type_ignored() {
        let mut registry = BlockTypeRegistry::new();
        let before = registry.len();
        registry.register::<TextOnly>().unwrap();
        assert_eq!(registry.len(), before);
    }
}
