//! Block Field Primitives
//!
//! The block format has no self-describing field names: every payload type
//! writes its fields in one declared order and reads them back in exactly
//! the same order. The schema lives in code, never on the wire.
//!
//! ## Field Encoding
//! - Integers and floats: fixed width, big-endian
//! - `bool`: one byte, `0` or `1`
//! - Strings: `u16` length prefix followed by UTF-8 bytes
//! - Byte arrays: `u32` length prefix followed by raw bytes
//! - Optional strings: presence byte, then the string when present
//! - String lists: `u16` count, then each string

use crate::error::BlockError;
use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;

/// Reserved block-type identifiers
///
/// Ids below [`block_types::APPLICATION_BASE`] belong to the framework.
pub mod block_types {
    /// Empty payload (no body)
    pub const EMPTY: u16 = 0x0000;
    /// Message envelope carrying type, request id and method
    pub const ENVELOPE: u16 = 0x0001;
    /// Error descriptor sent in Error messages
    pub const REMOTE_ERROR: u16 = 0x0002;
    pub const BOOL: u16 = 0x0003;
    pub const I32: u16 = 0x0004;
    pub const I64: u16 = 0x0005;
    pub const U32: u16 = 0x0006;
    pub const U64: u16 = 0x0007;
    pub const F64: u16 = 0x0008;
    pub const STRING: u16 = 0x0009;
    pub const BYTES: u16 = 0x000A;
    /// Notice a service sends to its clients before it disconnects
    pub const SERVICE_SHUTDOWN: u16 = 0x0010;
    /// First id available to application payload types
    pub const APPLICATION_BASE: u16 = 0x0100;

    /// Whether an id is reserved for framework use
    pub fn is_reserved(block_type: u16) -> bool {
        block_type < APPLICATION_BASE
    }
}

/// A payload block as it came off the wire: type tag plus undecoded body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    pub block_type: u16,
    pub bytes: Bytes,
}

impl RawBlock {
    pub fn new(block_type: u16, bytes: impl Into<Bytes>) -> Self {
        Self {
            block_type,
            bytes: bytes.into(),
        }
    }

    /// Block carrying no payload
    pub fn empty() -> Self {
        Self::new(block_types::EMPTY, Bytes::new())
    }

    pub fn is_empty(&self) -> bool {
        self.block_type == block_types::EMPTY
    }
}

/// Sequential field writer for block bodies
#[derive(Debug, Default)]
pub struct BlockWriter {
    buf: Vec<u8>,
}

impl BlockWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_bits().to_be_bytes());
    }

    /// Write a `u16`-prefixed UTF-8 string
    pub fn write_str(&mut self, field: &'static str, value: &str) -> Result<(), BlockError> {
        let len = u16::try_from(value.len()).map_err(|_| BlockError::TooLong {
            field,
            len: value.len(),
            max: u16::MAX as usize,
        })?;
        self.write_u16(len);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    pub fn write_opt_str(
        &mut self,
        field: &'static str,
        value: Option<&str>,
    ) -> Result<(), BlockError> {
        match value {
            Some(value) => {
                self.write_bool(true);
                self.write_str(field, value)
            }
            None => {
                self.write_bool(false);
                Ok(())
            }
        }
    }

    pub fn write_str_list(
        &mut self,
        field: &'static str,
        values: &[String],
    ) -> Result<(), BlockError> {
        let count = u16::try_from(values.len()).map_err(|_| BlockError::TooLong {
            field,
            len: values.len(),
            max: u16::MAX as usize,
        })?;
        self.write_u16(count);
        for value in values {
            self.write_str(field, value)?;
        }
        Ok(())
    }

    /// Write a `u32`-prefixed byte array
    pub fn write_bytes(&mut self, field: &'static str, value: &[u8]) -> Result<(), BlockError> {
        let len = u32::try_from(value.len()).map_err(|_| BlockError::TooLong {
            field,
            len: value.len(),
            max: u32::MAX as usize,
        })?;
        self.write_u32(len);
        self.buf.extend_from_slice(value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.buf)
    }
}

/// Sequential field reader over a borrowed block body
///
/// Reading never mutates the underlying bytes, so the same body can be read
/// again from a fresh reader after a failed attempt.
#[derive(Debug, Clone)]
pub struct BlockReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BlockReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], BlockError> {
        let remaining = self.remaining();
        if remaining < len {
            return Err(BlockError::Truncated {
                field,
                need: len,
                got: remaining,
                offset: self.pos,
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8, BlockError> {
        Ok(self.take(1, field)?[0])
    }

    pub fn read_bool(&mut self, field: &'static str) -> Result<bool, BlockError> {
        match self.read_u8(field)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(BlockError::InvalidValue {
                field,
                reason: format!("boolean byte {other}"),
            }),
        }
    }

    pub fn read_u16(&mut self, field: &'static str) -> Result<u16, BlockError> {
        Ok(BigEndian::read_u16(self.take(2, field)?))
    }

    pub fn read_u32(&mut self, field: &'static str) -> Result<u32, BlockError> {
        Ok(BigEndian::read_u32(self.take(4, field)?))
    }

    pub fn read_u64(&mut self, field: &'static str) -> Result<u64, BlockError> {
        Ok(BigEndian::read_u64(self.take(8, field)?))
    }

    pub fn read_i32(&mut self, field: &'static str) -> Result<i32, BlockError> {
        Ok(BigEndian::read_i32(self.take(4, field)?))
    }

    pub fn read_i64(&mut self, field: &'static str) -> Result<i64, BlockError> {
        Ok(BigEndian::read_i64(self.take(8, field)?))
    }

    pub fn read_f64(&mut self, field: &'static str) -> Result<f64, BlockError> {
        Ok(BigEndian::read_f64(self.take(8, field)?))
    }

    pub fn read_str(&mut self, field: &'static str) -> Result<String, BlockError> {
        let len = self.read_u16(field)? as usize;
        let raw = self.take(len, field)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| BlockError::InvalidUtf8 { field })
    }

    pub fn read_opt_str(&mut self, field: &'static str) -> Result<Option<String>, BlockError> {
        if self.read_bool(field)? {
            self.read_str(field).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn read_str_list(&mut self, field: &'static str) -> Result<Vec<String>, BlockError> {
        let count = self.read_u16(field)? as usize;
        (0..count).map(|_| self.read_str(field)).collect()
    }

    pub fn read_bytes(&mut self, field: &'static str) -> Result<Vec<u8>, BlockError> {
        let len = self.read_u32(field)? as usize;
        Ok(self.take(len, field)?.to_vec())
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Fail if any bytes were left unread
    pub fn finish(&self) -> Result<(), BlockError> {
        match self.remaining() {
            0 => Ok(()),
            remaining => Err(BlockError::TrailingBytes { remaining }),
        }
    }
}
