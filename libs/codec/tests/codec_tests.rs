//! # Codec Integration Tests
//!
//! Drives both wire formats through the `WireCodec` trait object the drivers
//! use, checking that a message means the same thing whichever format
//! carried it.

use port_codec::{WireCodec, WireFormat};
use port_types::{
    BlockError, BlockReader, BlockWriter, ErrorCode, Message, MessageType, Payload, PayloadType,
    RemoteError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Fill {
    venue: String,
    price: f64,
    size: u32,
    tags: Vec<String>,
}

impl PayloadType for Fill {
    const TYPE_NAME: &'static str = "Fill";
    const BLOCK_TYPE: Option<u16> = Some(0x0310);

    fn write_block(&self, w: &mut BlockWriter) -> Result<(), BlockError> {
        w.write_str("venue", &self.venue)?;
        w.write_f64(self.price);
        w.write_u32(self.size);
        w.write_str_list("tags", &self.tags)?;
        Ok(())
    }

    fn read_block(r: &mut BlockReader<'_>) -> Result<Self, BlockError> {
        Ok(Fill {
            venue: r.read_str("venue")?,
            price: r.read_f64("price")?,
            size: r.read_u32("size")?,
            tags: r.read_str_list("tags")?,
        })
    }
}

fn fill() -> Fill {
    Fill {
        venue: "XNYS".to_string(),
        price: 101.25,
        size: 300,
        tags: vec!["odd-lot".to_string(), "late".to_string()],
    }
}

fn codecs() -> Vec<Arc<dyn WireCodec>> {
    vec![WireFormat::Block.codec(), WireFormat::JsonRpc.codec()]
}

#[test]
fn test_typed_request_means_the_same_in_every_format() {
    for codec in codecs() {
        let msg = Message::request(17, "", Payload::local(fill())).with_source("gateway");
        let frame = codec.encode(&msg).unwrap();
        let decoded = codec.decode(&frame).unwrap();

        assert_eq!(decoded.request_id, 17, "{}", codec.name());
        assert_eq!(decoded.message_type, MessageType::Request);
        assert!(decoded.destination_method.is_empty());
        assert_eq!(decoded.source.as_deref(), Some("gateway"));
        assert_eq!(decoded.payload.try_read_as::<Fill>(), Some(fill()));
        // strict reads never confuse the carried type with another
        assert_eq!(decoded.payload.try_read_as::<String>(), None);
    }
}

#[test]
fn test_error_answers_keep_their_code_in_every_format() {
    for codec in codecs() {
        let msg = Message::error_to(
            9,
            RemoteError::new(ErrorCode::Application(409), "duplicate fill"),
        );
        let decoded = codec.decode(&codec.encode(&msg).unwrap()).unwrap();

        assert_eq!(decoded.message_type, MessageType::Error, "{}", codec.name());
        let err = decoded.remote_error().unwrap();
        assert_eq!(err.code, ErrorCode::Application(409));
        assert_eq!(err.message, "duplicate fill");
    }
}

#[test]
fn test_notifications_use_the_reserved_id_in_every_format() {
    for codec in codecs() {
        let msg = Message::notification("fills", Payload::local(fill()));
        let decoded = codec.decode(&codec.encode(&msg).unwrap()).unwrap();

        assert_eq!(decoded.message_type, MessageType::Notification, "{}", codec.name());
        assert_eq!(decoded.request_id, 0);
        assert_eq!(decoded.destination_method, "fills");
    }
}

#[test]
fn test_foreign_frames_are_not_recoverable() {
    let block = WireFormat::Block.codec();
    let json = WireFormat::JsonRpc.codec();

    let frame = block
        .encode(&Message::request(3, "", Payload::local(fill())))
        .unwrap();
    let err = json.decode(&frame).unwrap_err();
    assert!(!err.is_recoverable());
    assert_eq!(err.request_id, None);
}
