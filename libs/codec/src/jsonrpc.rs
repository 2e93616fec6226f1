//! JSON-RPC 2.0 dialect
//!
//! ```text
//! Request       {"jsonrpc":"2.0","id":7,"method":"add","params":{..},"type":"Pair"}
//! Notification  {"jsonrpc":"2.0","method":"tick","params":{..}}
//! Response      {"jsonrpc":"2.0","id":7,"result":{..},"type":"Sum"}
//! Error         {"jsonrpc":"2.0","id":7,"error":{"code":-32601,"message":"..","data":{"code":1}}}
//! ```
//!
//! Typed dispatch (no destination method) is written as `"method":"@<TypeName>"`.
//! Members outside JSON-RPC (`type`, `source`, and `method` on responses)
//! carry the parts of the message shape the dialect has no slot for.
//!
//! Payloads decode to [`Payload::Tree`]; binding to a concrete type happens
//! later in the consumer.

use crate::error::{CodecError, CodecResult, DecodeError};
use crate::wire::WireCodec;
use bytes::Bytes;
use port_types::{ErrorCode, Message, MessageType, Payload, RemoteError, RequestId};
use serde_json::{json, Map, Value};
use tracing::trace;

pub const JSONRPC_VERSION: &str = "2.0";

/// Prefix marking a method slot that names a payload type
pub const TYPED_METHOD_PREFIX: char = '@';

/// JSON-RPC reserved error codes
pub mod rpc_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const SERVER_ERROR: i64 = -32000;
}

fn rpc_code_for(code: ErrorCode) -> i64 {
    match code {
        ErrorCode::NotImplemented => rpc_codes::METHOD_NOT_FOUND,
        ErrorCode::DecodeFailure => rpc_codes::PARSE_ERROR,
        ErrorCode::TypeMismatch => rpc_codes::INVALID_PARAMS,
        ErrorCode::UnhandledException => rpc_codes::INTERNAL_ERROR,
        _ => rpc_codes::SERVER_ERROR,
    }
}

fn error_code_for(rpc_code: i64) -> ErrorCode {
    match rpc_code {
        rpc_codes::METHOD_NOT_FOUND => ErrorCode::NotImplemented,
        rpc_codes::PARSE_ERROR | rpc_codes::INVALID_REQUEST => ErrorCode::DecodeFailure,
        rpc_codes::INVALID_PARAMS => ErrorCode::TypeMismatch,
        rpc_codes::INTERNAL_ERROR => ErrorCode::UnhandledException,
        _ => ErrorCode::ServiceUnavailable,
    }
}

/// JSON-RPC 2.0 text format
#[derive(Debug, Clone, Default)]
pub struct JsonRpcCodec;

impl JsonRpcCodec {
    pub fn new() -> Self {
        Self
    }

    fn error_object(message: &Message) -> Value {
        let err = message
            .remote_error()
            .unwrap_or_else(|| RemoteError::unhandled("missing error descriptor"));
        json!({
            "code": rpc_code_for(err.code),
            "message": err.message,
            "data": { "code": err.code.as_u16() },
        })
    }
}

/// Read the `id` member: `Ok(None)` for absent or null
fn read_id(obj: &Map<String, Value>) -> Result<Option<RequestId>, DecodeError> {
    match obj.get("id") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|id| RequestId::try_from(id).ok())
            .map(Some)
            .ok_or_else(|| DecodeError::unrecoverable(0, format!("request id {n} out of range"))),
        Some(other) => Err(DecodeError::unrecoverable(
            0,
            format!("unsupported request id {other}"),
        )),
    }
}

fn read_opt_string(
    obj: &Map<String, Value>,
    key: &str,
    request_id: RequestId,
    message_type: MessageType,
) -> Result<Option<String>, DecodeError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(DecodeError::recoverable(
            request_id,
            Some(message_type),
            0,
            format!("member '{key}' must be a string, found {other}"),
        )),
    }
}

fn decode_error_payload(
    error: &Value,
    request_id: RequestId,
) -> Result<Payload, DecodeError> {
    let obj = error.as_object().ok_or_else(|| {
        DecodeError::recoverable(request_id, Some(MessageType::Error), 0, "error member is not an object")
    })?;
    let message = obj
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let exact = obj
        .get("data")
        .and_then(|data| data.get("code"))
        .and_then(Value::as_u64)
        .and_then(|code| u16::try_from(code).ok());
    let code = match exact {
        Some(code) => ErrorCode::from(code),
        None => error_code_for(obj.get("code").and_then(Value::as_i64).unwrap_or(rpc_codes::SERVER_ERROR)),
    };
    let descriptor = RemoteError::new(code, message);
    let tree = serde_json::to_value(&descriptor).map_err(|e| {
        DecodeError::recoverable(request_id, Some(MessageType::Error), 0, e.to_string())
    })?;
    Ok(Payload::tree(Some("RemoteError".to_string()), tree))
}

impl WireCodec for JsonRpcCodec {
    fn name(&self) -> &'static str {
        "jsonrpc"
    }

    fn encode(&self, message: &Message) -> CodecResult<Bytes> {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), JSONRPC_VERSION.into());

        match message.message_type {
            MessageType::Request | MessageType::Notification => {
                let (type_name, params) = message.payload.to_tree()?;
                if message.message_type == MessageType::Request {
                    obj.insert("id".into(), message.request_id.into());
                }
                let method = if message.destination_method.is_empty() {
                    format!("{TYPED_METHOD_PREFIX}{}", type_name.as_deref().unwrap_or_default())
                } else {
                    message.destination_method.clone()
                };
                obj.insert("method".into(), method.into());
                obj.insert("params".into(), params);
                if let Some(type_name) = type_name {
                    obj.insert("type".into(), type_name.into());
                }
            }
            MessageType::Response => {
                let (type_name, result) = message.payload.to_tree()?;
                obj.insert("id".into(), message.request_id.into());
                obj.insert("result".into(), result);
                if let Some(type_name) = type_name {
                    obj.insert("type".into(), type_name.into());
                }
                if !message.destination_method.is_empty() {
                    obj.insert("method".into(), message.destination_method.clone().into());
                }
            }
            MessageType::Error => {
                obj.insert("id".into(), message.request_id.into());
                obj.insert("error".into(), Self::error_object(message));
            }
        }
        if let Some(source) = &message.source {
            obj.insert("source".into(), source.clone().into());
        }

        let bytes = serde_json::to_vec(&Value::Object(obj)).map_err(CodecError::Json)?;
        trace!(
            request_id = message.request_id,
            message_type = ?message.message_type,
            size = bytes.len(),
            "Encoded JSON-RPC frame"
        );
        Ok(Bytes::from(bytes))
    }

    fn decode(&self, frame: &[u8]) -> Result<Message, DecodeError> {
        let value: Value = serde_json::from_slice(frame)
            .map_err(|e| DecodeError::unrecoverable(e.column(), format!("malformed JSON: {e}")))?;
        let obj = value
            .as_object()
            .ok_or_else(|| DecodeError::unrecoverable(0, "frame is not a JSON object"))?;

        let id = read_id(obj)?;
        let request_id = id.unwrap_or(0);

        // answers may echo `method`, so `result`/`error` decide first
        let message_type = if obj.contains_key("error") {
            MessageType::Error
        } else if obj.contains_key("result") {
            MessageType::Response
        } else if obj.contains_key("method") {
            match id {
                Some(id) if id != 0 => MessageType::Request,
                _ => MessageType::Notification,
            }
        } else {
            return Err(DecodeError::recoverable(
                request_id,
                None,
                0,
                "object has none of method, result or error",
            ));
        };

        match obj.get("jsonrpc").and_then(Value::as_str) {
            Some(JSONRPC_VERSION) => {}
            other => {
                return Err(DecodeError::recoverable(
                    request_id,
                    Some(message_type),
                    0,
                    format!("unsupported jsonrpc version {other:?}"),
                ))
            }
        }

        if message_type.is_answer() && request_id == 0 {
            return Err(DecodeError::unrecoverable(0, "answer without request id"));
        }

        let source = read_opt_string(obj, "source", request_id, message_type)?;
        let carried_type = read_opt_string(obj, "type", request_id, message_type)?;

        let (destination_method, payload) = match message_type {
            MessageType::Request | MessageType::Notification => {
                let method = read_opt_string(obj, "method", request_id, message_type)?
                    .unwrap_or_default();
                let params = obj.get("params").cloned().unwrap_or(Value::Null);
                match method.strip_prefix(TYPED_METHOD_PREFIX) {
                    Some(type_name) => {
                        let type_name = carried_type.or_else(|| {
                            (!type_name.is_empty()).then(|| type_name.to_string())
                        });
                        (String::new(), Payload::tree(type_name, params))
                    }
                    None => (method, Payload::tree(carried_type, params)),
                }
            }
            MessageType::Response => {
                let method = read_opt_string(obj, "method", request_id, message_type)?
                    .unwrap_or_default();
                let result = obj.get("result").cloned().unwrap_or(Value::Null);
                let payload = if result.is_null() && carried_type.is_none() {
                    Payload::Empty
                } else {
                    Payload::tree(carried_type, result)
                };
                (method, payload)
            }
            MessageType::Error => {
                let error = obj.get("error").unwrap_or(&Value::Null);
                (String::new(), decode_error_payload(error, request_id)?)
            }
        };

        Ok(Message {
            request_id,
            message_type,
            destination_method,
            payload,
            source,
            client: None,
        })
    }
}
