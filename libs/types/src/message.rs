//! Protocol-independent message shape
//!
//! Every driver must carry `{type, request_id, destination_method, payload}`
//! losslessly, even when its wire format has no native notion of one of them.
//!
//! ## Invariants
//! - A Response or Error always carries the `request_id` of the Request it answers
//! - A Notification always carries `request_id == 0`

use crate::block::{block_types, BlockReader, BlockWriter};
use crate::error::{BlockError, RemoteError};
use crate::payload::{Payload, PayloadType};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Request identifier, unique per proxy-port lifetime
pub type RequestId = u32;

/// Id reserved for notifications and unsolicited messages
pub const NOTIFICATION_ID: RequestId = 0;

/// Message kind
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize,
)]
pub enum MessageType {
    Request = 1,
    Response = 2,
    Notification = 3,
    Error = 4,
}

impl MessageType {
    /// Whether this kind answers a Request
    pub fn is_answer(self) -> bool {
        matches!(self, MessageType::Response | MessageType::Error)
    }
}

/// Identity of one peer connected to a Service Port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Unit of communication between ports
#[derive(Debug, Clone)]
pub struct Message {
    pub request_id: RequestId,
    pub message_type: MessageType,
    /// Handler method name; empty for typed dispatch
    pub destination_method: String,
    pub payload: Payload,
    /// Logical name of the sending port
    pub source: Option<String>,
    /// Connection the message arrived on (service side only)
    pub client: Option<ClientId>,
}

impl Message {
    pub fn request(
        request_id: RequestId,
        destination_method: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            request_id,
            message_type: MessageType::Request,
            destination_method: destination_method.into(),
            payload,
            source: None,
            client: None,
        }
    }

    pub fn notification(destination_method: impl Into<String>, payload: Payload) -> Self {
        Self {
            request_id: NOTIFICATION_ID,
            message_type: MessageType::Notification,
            destination_method: destination_method.into(),
            payload,
            source: None,
            client: None,
        }
    }

    /// Response addressed to the request's id and connection
    pub fn response_to(request: &Message, payload: Payload) -> Self {
        Self {
            request_id: request.request_id,
            message_type: MessageType::Response,
            destination_method: request.destination_method.clone(),
            payload,
            source: None,
            client: request.client,
        }
    }

    /// Error addressed to a request id
    pub fn error_to(request_id: RequestId, error: RemoteError) -> Self {
        Self {
            request_id,
            message_type: MessageType::Error,
            destination_method: String::new(),
            payload: Payload::local(error),
            source: None,
            client: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_client(mut self, client: ClientId) -> Self {
        self.client = Some(client);
        self
    }

    pub fn is_answer(&self) -> bool {
        self.message_type.is_answer()
    }

    /// Error descriptor of an Error message
    ///
    /// Falls back to a generic descriptor when the peer sent an error payload
    /// this side cannot read.
    pub fn remote_error(&self) -> Option<RemoteError> {
        if self.message_type != MessageType::Error {
            return None;
        }
        Some(
            self.payload
                .try_read_as::<RemoteError>()
                .unwrap_or_else(|| RemoteError::unhandled(format!("unreadable error payload: {:?}", self.payload))),
        )
    }
}

/// Notice a Service Port sends to every linked client before it tears down
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceShutdown {
    pub service: String,
}

impl PayloadType for ServiceShutdown {
    const TYPE_NAME: &'static str = "ServiceShutdown";
    const BLOCK_TYPE: Option<u16> = Some(block_types::SERVICE_SHUTDOWN);

    fn write_block(&self, w: &mut BlockWriter) -> Result<(), BlockError> {
        w.write_str("service", &self.service)
    }

    fn read_block(r: &mut BlockReader<'_>) -> Result<Self, BlockError> {
        Ok(Self {
            service: r.read_str("service")?,
        })
    }
}
