//! Binary block codec
//!
//! ## Frame Layout
//!
//! ```text
//! ┌────────────────┬────────────────┬───────────┐
//! │ envelope block │ payload block  │ crc32:u32 │
//! └────────────────┴────────────────┴───────────┘
//!
//! block    := block_type:u16 | body_len:u32 | body
//! envelope := message_type:u8 | request_id:u32 | destination_method:str16
//!             | has_source:u8 [source:str16]
//! ```
//!
//! All integers are big-endian. The checksum covers every byte before it.
//!
//! ## Recoverability
//!
//! The envelope is parsed before the checksum is verified so that a frame
//! with a damaged payload still yields its request id. Anything that fails
//! after the envelope parsed is reported as a recoverable [`DecodeError`].

use crate::error::{CodecError, CodecResult, DecodeError};
use crate::wire::WireCodec;
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use port_types::{
    block_types, BlockReader, BlockWriter, Message, MessageType, Payload, RawBlock, RequestId,
};
use tracing::trace;

/// Bytes of a block header: type tag plus body length
pub const BLOCK_HEADER_SIZE: usize = 6;

/// Bytes of the checksum trailer
pub const CHECKSUM_SIZE: usize = 4;

/// Default cap on an encoded frame
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Type-tagged binary block format
#[derive(Debug, Clone)]
pub struct BlockCodec {
    max_frame_size: usize,
}

impl Default for BlockCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    fn encode_envelope(message: &Message) -> CodecResult<Bytes> {
        let mut w = BlockWriter::with_capacity(16 + message.destination_method.len());
        w.write_u8(message.message_type.into());
        w.write_u32(message.request_id);
        w.write_str("destination_method", &message.destination_method)?;
        w.write_opt_str("source", message.source.as_deref())?;
        Ok(w.into_bytes())
    }

    fn put_block(buf: &mut BytesMut, block_type: u16, body: &[u8]) -> CodecResult<()> {
        let len = u32::try_from(body.len()).map_err(|_| CodecError::FrameTooLarge {
            size: body.len(),
            max: u32::MAX as usize,
        })?;
        buf.put_u16(block_type);
        buf.put_u32(len);
        buf.put_slice(body);
        Ok(())
    }
}

/// Split one block off the front of `data`, returning (type, body, consumed)
fn split_block(data: &[u8], offset: usize) -> Result<(u16, &[u8], usize), String> {
    if data.len() < BLOCK_HEADER_SIZE {
        return Err(format!(
            "truncated block header at byte {offset}: need {BLOCK_HEADER_SIZE}, got {}",
            data.len()
        ));
    }
    let block_type = BigEndian::read_u16(&data[0..2]);
    let body_len = BigEndian::read_u32(&data[2..6]) as usize;
    let end = BLOCK_HEADER_SIZE + body_len;
    if data.len() < end {
        return Err(format!(
            "truncated block {block_type:#06x} at byte {offset}: body needs {body_len}, got {}",
            data.len() - BLOCK_HEADER_SIZE
        ));
    }
    Ok((block_type, &data[BLOCK_HEADER_SIZE..end], end))
}

struct Envelope {
    message_type: Option<MessageType>,
    request_id: RequestId,
    destination_method: String,
    source: Option<String>,
}

/// Parse the envelope body
///
/// An unknown message type still yields the request id; only a body too
/// short to hold the id is unrecoverable.
fn parse_envelope(body: &[u8]) -> Result<Envelope, DecodeError> {
    let mut r = BlockReader::new(body);
    let raw_type = r
        .read_u8("message_type")
        .map_err(|e| DecodeError::unrecoverable(BLOCK_HEADER_SIZE, e.to_string()))?;
    let request_id = r
        .read_u32("request_id")
        .map_err(|e| DecodeError::unrecoverable(BLOCK_HEADER_SIZE, e.to_string()))?;
    let message_type = MessageType::try_from(raw_type).ok();

    let rest = (|| {
        let destination_method = r.read_str("destination_method")?;
        let source = r.read_opt_str("source")?;
        r.finish()?;
        Ok::<_, port_types::BlockError>((destination_method, source))
    })();

    match (message_type, rest) {
        (Some(message_type), Ok((destination_method, source))) => Ok(Envelope {
            message_type: Some(message_type),
            request_id,
            destination_method,
            source,
        }),
        (None, _) => Err(DecodeError::recoverable(
            request_id,
            None,
            BLOCK_HEADER_SIZE,
            format!("unknown message type {raw_type}"),
        )),
        (Some(message_type), Err(e)) => Err(DecodeError::recoverable(
            request_id,
            Some(message_type),
            BLOCK_HEADER_SIZE + r.position(),
            e.to_string(),
        )),
    }
}

impl WireCodec for BlockCodec {
    fn name(&self) -> &'static str {
        "block"
    }

    fn encode(&self, message: &Message) -> CodecResult<Bytes> {
        let envelope = Self::encode_envelope(message)?;
        let payload = message.payload.to_block()?;

        let size = 2 * BLOCK_HEADER_SIZE + envelope.len() + payload.bytes.len() + CHECKSUM_SIZE;
        if size > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }

        let mut buf = BytesMut::with_capacity(size);
        Self::put_block(&mut buf, block_types::ENVELOPE, &envelope)?;
        Self::put_block(&mut buf, payload.block_type, &payload.bytes)?;
        let checksum = crc32fast::hash(&buf);
        buf.put_u32(checksum);

        trace!(
            request_id = message.request_id,
            message_type = ?message.message_type,
            payload_block = payload.block_type,
            size,
            "Encoded block frame"
        );
        Ok(buf.freeze())
    }

    fn decode(&self, frame: &[u8]) -> Result<Message, DecodeError> {
        if frame.len() > self.max_frame_size {
            return Err(DecodeError::unrecoverable(
                0,
                format!("frame of {} bytes exceeds maximum {}", frame.len(), self.max_frame_size),
            ));
        }

        let (envelope_type, envelope_body, mut offset) =
            split_block(frame, 0).map_err(|reason| DecodeError::unrecoverable(0, reason))?;
        if envelope_type != block_types::ENVELOPE {
            return Err(DecodeError::unrecoverable(
                0,
                format!("expected envelope block, found {envelope_type:#06x}"),
            ));
        }
        let envelope = parse_envelope(envelope_body)?;
        let message_type = envelope.message_type;
        let request_id = envelope.request_id;

        let (payload_type, payload_body, consumed) = split_block(&frame[offset..], offset)
            .map_err(|reason| DecodeError::recoverable(request_id, message_type, offset, reason))?;
        offset += consumed;

        let trailer = &frame[offset..];
        if trailer.len() != CHECKSUM_SIZE {
            return Err(DecodeError::recoverable(
                request_id,
                message_type,
                offset,
                format!("expected {CHECKSUM_SIZE} checksum bytes, found {}", trailer.len()),
            ));
        }
        let expected = BigEndian::read_u32(trailer);
        let calculated = crc32fast::hash(&frame[..offset]);
        if expected != calculated {
            return Err(DecodeError::checksum_mismatch(
                request_id,
                message_type,
                expected,
                calculated,
                offset,
            ));
        }

        let payload = Payload::block(RawBlock::new(
            payload_type,
            Bytes::copy_from_slice(payload_body),
        ));

        Ok(Message {
            request_id,
            // parse_envelope only returns Ok with a known message type
            message_type: message_type.unwrap_or(MessageType::Error),
            destination_method: envelope.destination_method,
            payload,
            source: envelope.source,
            client: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use port_types::{BlockError, ErrorCode, PayloadType, RemoteError};
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        account: String,
        quantity: u32,
    }

    impl PayloadType for Order {
        const TYPE_NAME: &'static str = "Order";
        const BLOCK_TYPE: Option<u16> = Some(0x0200);

        fn write_block(&self, w: &mut BlockWriter) -> Result<(), BlockError> {
            w.write_str("account", &self.account)?;
            w.write_u32(self.quantity);
            Ok(())
        }

        fn read_block(r: &mut BlockReader<'_>) -> Result<Self, BlockError> {
            Ok(Order {
                account: r.read_str("account")?,
                quantity: r.read_u32("quantity")?,
            })
        }
    }

    fn order() -> Order {
        Order {
            account: "acct-1".to_string(),
            quantity: 25,
        }
    }

    #[test]
    fn test_request_survives_wire() {
        let codec = BlockCodec::new();
        let msg = Message::request(42, "place", Payload::local(order())).with_source("desk");

        let frame = codec.encode(&msg).unwrap();
        let decoded = codec.decode(&frame).unwrap();

        assert_eq!(decoded.request_id, 42);
        assert_eq!(decoded.message_type, MessageType::Request);
        assert_eq!(decoded.destination_method, "place");
        assert_eq!(decoded.source.as_deref(), Some("desk"));
        assert_eq!(decoded.payload.block_type(), Some(0x0200));
        assert_eq!(decoded.payload.try_read_as::<Order>(), Some(order()));
    }

    #[test]
    fn test_error_message_survives_wire() {
        let codec = BlockCodec::new();
        let msg = Message::error_to(7, RemoteError::not_implemented("Order"));
        let decoded = codec.decode(&codec.encode(&msg).unwrap()).unwrap();

        assert_eq!(decoded.message_type, MessageType::Error);
        let err = decoded.remote_error().unwrap();
        assert_eq!(err.code, ErrorCode::NotImplemented);
    }

    #[test]
    fn test_empty_payload_notification() {
        let codec = BlockCodec::new();
        let msg = Message::notification("heartbeat", Payload::Empty);
        let decoded = codec.decode(&codec.encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded.request_id, 0);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_corrupt_payload_is_recoverable() {
        let codec = BlockCodec::new();
        let msg = Message::request(99, "place", Payload::local(order()));
        let mut frame = codec.encode(&msg).unwrap().to_vec();
        let last_payload_byte = frame.len() - CHECKSUM_SIZE - 1;
        frame[last_payload_byte] ^= 0xff;

        let err = codec.decode(&frame).unwrap_err();
        assert_eq!(err.request_id, Some(99));
        assert_eq!(err.message_type, Some(MessageType::Request));
        assert!(err.reason.contains("checksum"));
    }

    #[test]
    fn test_truncated_envelope_is_unrecoverable() {
        let codec = BlockCodec::new();
        let err = codec.decode(&[0x00, 0x01, 0x00]).unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_truncated_payload_keeps_request_id() {
        let codec = BlockCodec::new();
        let msg = Message::request(5, "place", Payload::local(order()));
        let frame = codec.encode(&msg).unwrap();
        let cut = &frame[..frame.len() - CHECKSUM_SIZE - 3];

        let err = codec.decode(cut).unwrap_err();
        assert_eq!(err.request_id, Some(5));
    }

    #[test]
    fn test_tree_payload_cannot_be_block_encoded() {
        let codec = BlockCodec::new();
        let msg = Message::request(1, "x", Payload::tree(None, serde_json::json!({"a": 1})));
        assert!(matches!(codec.encode(&msg), Err(CodecError::Payload(_))));
    }

    #[test]
    fn test_frame_size_cap() {
        let codec = BlockCodec::with_max_frame_size(32);
        let msg = Message::request(1, "x", Payload::local(vec![0u8; 64]));
        assert!(matches!(
            codec.encode(&msg),
            Err(CodecError::FrameTooLarge { max: 32, .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_identity_preserved(id in 1u32.., method in "[a-z_]{0,24}", qty in any::<u32>()) {
            let codec = BlockCodec::new();
            let payload = Order { account: "p".into(), quantity: qty };
            let msg = Message::request(id, method.clone(), Payload::local(payload.clone()));
            let decoded = codec.decode(&codec.encode(&msg).unwrap()).unwrap();
            prop_assert_eq!(decoded.request_id, id);
            prop_assert_eq!(decoded.destination_method, method);
            prop_assert_eq!(decoded.payload.try_read_as::<Order>(), Some(payload));
        }
    }
}
