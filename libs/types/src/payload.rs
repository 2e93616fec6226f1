//! Serialization Payload
//!
//! A received message body is kept in whatever intermediate form its driver
//! produced and is only bound to a concrete type when a consumer asks for
//! one. The receiving side often cannot know the static type until it has
//! looked at the destination method or the carried type name, so decoding
//! happens in two phases:
//!
//! 1. The driver yields a self-contained [`Payload`]: a JSON tree, a raw
//!    block (type tag + body bytes), or an in-process object.
//! 2. A consumer calls [`Payload::try_read_as`] with the type it expects.
//!    A mismatch reports absence instead of failing, and never disturbs the
//!    stored form, so the same payload can be read again as an error
//!    descriptor or a diagnostic value.

use crate::block::{block_types, BlockReader, BlockWriter, RawBlock};
use crate::error::{BlockError, PayloadError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Contract for application types that travel through actor ports
///
/// Every payload type is representable as a JSON tree through serde. Types
/// that also travel over the binary block format declare a fixed
/// [`PayloadType::BLOCK_TYPE`] and write/read their fields in one explicit
/// order.
///
/// ```rust
/// use port_types::{BlockError, BlockReader, BlockWriter, PayloadType};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct Ping { seq: u32 }
///
/// impl PayloadType for Ping {
///     const TYPE_NAME: &'static str = "Ping";
///     const BLOCK_TYPE: Option<u16> = Some(0x0100);
///
///     fn write_block(&self, w: &mut BlockWriter) -> Result<(), BlockError> {
///         w.write_u32(self.seq);
///         Ok(())
///     }
///
///     fn read_block(r: &mut BlockReader<'_>) -> Result<Self, BlockError> {
///         Ok(Ping { seq: r.read_u32("seq")? })
///     }
/// }
/// ```
pub trait PayloadType: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static {
    /// Type discriminator carried with the message and used for dispatch
    const TYPE_NAME: &'static str;

    /// Declared base type, consulted when no handler matches this type
    const BASE_TYPE: Option<&'static str> = None;

    /// Fixed block-type id for the binary format
    const BLOCK_TYPE: Option<u16> = None;

    fn write_block(&self, _w: &mut BlockWriter) -> Result<(), BlockError> {
        Err(BlockError::Unsupported {
            type_name: Self::TYPE_NAME,
        })
    }

    fn read_block(_r: &mut BlockReader<'_>) -> Result<Self, BlockError> {
        Err(BlockError::Unsupported {
            type_name: Self::TYPE_NAME,
        })
    }

    fn to_tree(&self) -> Result<Value, PayloadError> {
        serde_json::to_value(self).map_err(|source| PayloadError::Serialize {
            type_name: Self::TYPE_NAME,
            source,
        })
    }

    fn from_tree(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }
}

/// Object-safe view of a [`PayloadType`] value
///
/// Lets in-process payloads move between ports without serialization while
/// still being re-encodable when they have to cross a wire.
pub trait ErasedPayload: fmt::Debug + Send + Sync {
    fn type_name(&self) -> &'static str;
    fn block_type(&self) -> Option<u16>;
    fn to_tree(&self) -> Result<Value, PayloadError>;
    fn encode_block(&self) -> Result<RawBlock, PayloadError>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: PayloadType> ErasedPayload for T {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn block_type(&self) -> Option<u16> {
        T::BLOCK_TYPE
    }

    fn to_tree(&self) -> Result<Value, PayloadError> {
        PayloadType::to_tree(self)
    }

    fn encode_block(&self) -> Result<RawBlock, PayloadError> {
        let block_type = T::BLOCK_TYPE.ok_or(BlockError::Unsupported {
            type_name: T::TYPE_NAME,
        })?;
        let mut writer = BlockWriter::new();
        self.write_block(&mut writer)?;
        Ok(RawBlock::new(block_type, writer.into_bytes()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Borrowed intermediate representation of a payload
#[derive(Debug, Clone, Copy)]
pub enum NativeForm<'a> {
    Empty,
    Local(&'a dyn ErasedPayload),
    Tree(&'a Value),
    Block(&'a RawBlock),
}

/// Message body in its deferred form
#[derive(Clone, Default)]
pub enum Payload {
    #[default]
    Empty,
    /// In-process value, shared without serialization
    Local(Arc<dyn ErasedPayload>),
    /// Parsed text-dialect value with the optional carried type name
    Tree {
        type_name: Option<String>,
        value: Value,
    },
    /// Binary block as read from the wire
    Block(RawBlock),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Empty => write!(f, "Payload::Empty"),
            Payload::Local(value) => f.debug_tuple("Payload::Local").field(value).finish(),
            Payload::Tree { type_name, value } => f
                .debug_struct("Payload::Tree")
                .field("type_name", type_name)
                .field("value", value)
                .finish(),
            Payload::Block(raw) => f
                .debug_struct("Payload::Block")
                .field("block_type", &format_args!("{:#06x}", raw.block_type))
                .field("len", &raw.bytes.len())
                .finish(),
        }
    }
}

impl Payload {
    pub fn local<T: PayloadType>(value: T) -> Self {
        Payload::Local(Arc::new(value))
    }

    pub fn tree(type_name: Option<String>, value: Value) -> Self {
        Payload::Tree { type_name, value }
    }

    pub fn block(raw: RawBlock) -> Self {
        if raw.is_empty() {
            Payload::Empty
        } else {
            Payload::Block(raw)
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }

    /// The serializer's intermediate representation
    pub fn as_native_form(&self) -> NativeForm<'_> {
        match self {
            Payload::Empty => NativeForm::Empty,
            Payload::Local(value) => NativeForm::Local(value.as_ref()),
            Payload::Tree { value, .. } => NativeForm::Tree(value),
            Payload::Block(raw) => NativeForm::Block(raw),
        }
    }

    /// Carried type discriminator, when the form records one
    ///
    /// Block payloads only carry a numeric block type; see
    /// [`Payload::block_type`].
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Payload::Empty => None,
            Payload::Local(value) => Some(value.type_name()),
            Payload::Tree { type_name, .. } => type_name.as_deref(),
            Payload::Block(_) => None,
        }
    }

    pub fn block_type(&self) -> Option<u16> {
        match self {
            Payload::Empty => Some(block_types::EMPTY),
            Payload::Local(value) => value.block_type(),
            Payload::Tree { .. } => None,
            Payload::Block(raw) => Some(raw.block_type),
        }
    }

    /// Resolve the payload as `T`, or report absence
    ///
    /// Matching is strict: a carried type name or block type must be `T`'s
    /// own, and a block body must be consumed completely.
    pub fn try_read_as<T: PayloadType>(&self) -> Option<T> {
        match self {
            Payload::Empty => T::from_tree(&Value::Null),
            Payload::Local(value) => value.as_any().downcast_ref::<T>().cloned(),
            Payload::Tree { type_name, value } => match type_name {
                Some(name) if name != T::TYPE_NAME => None,
                _ => T::from_tree(value),
            },
            Payload::Block(raw) => {
                if T::BLOCK_TYPE != Some(raw.block_type) {
                    return None;
                }
                let mut reader = BlockReader::new(&raw.bytes);
                let value = T::read_block(&mut reader).ok()?;
                reader.finish().ok()?;
                Some(value)
            }
        }
    }

    /// Resolve the payload as a declared base type of the carried type
    ///
    /// Relaxed counterpart of [`Payload::try_read_as`] used by dispatch
    /// fallback: tree payloads are read structurally and block bodies only
    /// need to start with the base type's fields.
    pub fn read_as_base<T: PayloadType>(&self) -> Option<T> {
        match self {
            Payload::Empty => None,
            Payload::Local(value) => {
                let tree = value.to_tree().ok()?;
                T::from_tree(&tree)
            }
            Payload::Tree { value, .. } => T::from_tree(value),
            Payload::Block(raw) => {
                T::BLOCK_TYPE?;
                let mut reader = BlockReader::new(&raw.bytes);
                T::read_block(&mut reader).ok()
            }
        }
    }

    /// Produce the text-dialect form: carried type name plus JSON tree
    pub fn to_tree(&self) -> Result<(Option<String>, Value), PayloadError> {
        match self {
            Payload::Empty => Ok((None, Value::Null)),
            Payload::Local(value) => Ok((Some(value.type_name().to_string()), value.to_tree()?)),
            Payload::Tree { type_name, value } => Ok((type_name.clone(), value.clone())),
            Payload::Block(_) => Err(PayloadError::FormMismatch {
                form: "block",
                target: "tree",
            }),
        }
    }

    /// Produce the binary form
    pub fn to_block(&self) -> Result<RawBlock, PayloadError> {
        match self {
            Payload::Empty => Ok(RawBlock::empty()),
            Payload::Local(value) => value.encode_block(),
            Payload::Block(raw) => Ok(raw.clone()),
            Payload::Tree { .. } => Err(PayloadError::FormMismatch {
                form: "tree",
                target: "block",
            }),
        }
    }
}

macro_rules! primitive_payload {
    ($ty:ty, $name:literal, $id:expr, $write:ident, $read:ident) => {
        impl PayloadType for $ty {
            const TYPE_NAME: &'static str = $name;
            const BLOCK_TYPE: Option<u16> = Some($id);

            fn write_block(&self, w: &mut BlockWriter) -> Result<(), BlockError> {
                w.$write(*self);
                Ok(())
            }

            fn read_block(r: &mut BlockReader<'_>) -> Result<Self, BlockError> {
                r.$read("value")
            }
        }
    };
}

primitive_payload!(bool, "bool", block_types::BOOL, write_bool, read_bool);
primitive_payload!(i32, "i32", block_types::I32, write_i32, read_i32);
primitive_payload!(i64, "i64", block_types::I64, write_i64, read_i64);
primitive_payload!(u32, "u32", block_types::U32, write_u32, read_u32);
primitive_payload!(u64, "u64", block_types::U64, write_u64, read_u64);
primitive_payload!(f64, "f64", block_types::F64, write_f64, read_f64);

impl PayloadType for () {
    const TYPE_NAME: &'static str = "unit";
    const BLOCK_TYPE: Option<u16> = Some(block_types::EMPTY);

    fn write_block(&self, _w: &mut BlockWriter) -> Result<(), BlockError> {
        Ok(())
    }

    fn read_block(_r: &mut BlockReader<'_>) -> Result<Self, BlockError> {
        Ok(())
    }
}

impl PayloadType for String {
    const TYPE_NAME: &'static str = "string";
    const BLOCK_TYPE: Option<u16> = Some(block_types::STRING);

    fn write_block(&self, w: &mut BlockWriter) -> Result<(), BlockError> {
        w.write_bytes("value", self.as_bytes())
    }

    fn read_block(r: &mut BlockReader<'_>) -> Result<Self, BlockError> {
        String::from_utf8(r.read_bytes("value")?).map_err(|_| BlockError::InvalidUtf8 { field: "value" })
    }
}

impl PayloadType for Vec<u8> {
    const TYPE_NAME: &'static str = "bytes";
    const BLOCK_TYPE: Option<u16> = Some(block_types::BYTES);

    fn write_block(&self, w: &mut BlockWriter) -> Result<(), BlockError> {
        w.write_bytes("value", self)
    }

    fn read_block(r: &mut BlockReader<'_>) -> Result<Self, BlockError> {
        r.read_bytes("value")
    }
}
