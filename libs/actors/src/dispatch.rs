//! # Dispatch Table
//!
//! ## Purpose
//!
//! Selects the handler for an inbound message from an explicit table instead
//! of runtime overload resolution. Lookup order:
//!
//! 1. Handler registered for the message's `destination_method`
//! 2. Handler registered for the payload's exact type
//! 3. Handlers for the declared base-type chain, nearest first
//! 4. The fallback handler
//! 5. A `NotImplemented` error
//!
//! The payload type comes from the carried type name (tree and in-process
//! payloads) or from the block-type id mapped through the table's
//! [`BlockTypeRegistry`] (block payloads).
//!
//! ## Failure Mapping
//!
//! | Condition | Error code |
//! |-----------|------------|
//! | No route | `NotImplemented` |
//! | Payload unreadable as the handler's type | `TypeMismatch` |
//! | Handler returned `Err` or panicked | `UnhandledException` |
//!
//! A handler may return a [`RemoteError`] (directly or inside its
//! `anyhow::Error`) to choose the code itself.

use futures::future::BoxFuture;
use futures::FutureExt;
use port_codec::{BlockTypeRegistry, CodecResult};
use port_types::{
    ClientId, ErrorCode, Message, MessageType, Payload, PayloadType, RemoteError, RequestId,
};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::error;

/// Upper bound on base-type hops, guarding against declaration cycles
const MAX_BASE_DEPTH: usize = 16;

pub type HandlerFuture = BoxFuture<'static, Result<Payload, RemoteError>>;

/// What a handler knows about the message it is serving
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub message_type: MessageType,
    pub method: String,
    pub client: Option<ClientId>,
    pub source: Option<String>,
}

impl RequestContext {
    pub fn from_message(message: &Message) -> Self {
        Self {
            request_id: message.request_id,
            message_type: message.message_type,
            method: message.destination_method.clone(),
            client: message.client,
            source: message.source.clone(),
        }
    }

    pub fn is_notification(&self) -> bool {
        self.message_type == MessageType::Notification
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadMode {
    Exact,
    AsBase,
}

type ErasedHandler = Arc<dyn Fn(RequestContext, &Payload, ReadMode) -> HandlerFuture + Send + Sync>;
type FallbackHandler = Arc<dyn Fn(Message) -> HandlerFuture + Send + Sync>;

/// Which table entry served a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Method(String),
    Exact(String),
    Base { declared: String, handled_as: String },
    Fallback,
    NotImplemented(String),
}

/// Convert a handler failure into the error sent to the caller
pub fn to_remote_error(err: anyhow::Error) -> RemoteError {
    match err.downcast::<RemoteError>() {
        Ok(remote) => remote,
        Err(other) => RemoteError::unhandled(format!("{other:#}")),
    }
}

fn typed_handler<T, R, F, Fut>(handler: F) -> ErasedHandler
where
    T: PayloadType,
    R: PayloadType,
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
{
    Arc::new(move |ctx, payload, mode| {
        let value = match mode {
            ReadMode::Exact => payload.try_read_as::<T>(),
            ReadMode::AsBase => payload.read_as_base::<T>(),
        };
        match value {
            Some(value) => {
                let call = handler(value, ctx);
                async move { call.await.map(Payload::local).map_err(to_remote_error) }.boxed()
            }
            None => {
                let err = RemoteError::new(
                    ErrorCode::TypeMismatch,
                    format!(
                        "payload {} cannot be read as '{}'",
                        describe(payload),
                        T::TYPE_NAME
                    ),
                );
                async move { Err(err) }.boxed()
            }
        }
    })
}

fn describe(payload: &Payload) -> String {
    match (payload.type_name(), payload.block_type()) {
        (Some(name), _) => format!("'{name}'"),
        (None, Some(id)) => format!("block {id:#06x}"),
        (None, None) => "without type".to_string(),
    }
}

/// Explicit handler table for one Service Port
#[derive(Clone, Default)]
pub struct DispatchTable {
    methods: HashMap<String, ErasedHandler>,
    types: HashMap<&'static str, ErasedHandler>,
    bases: HashMap<&'static str, &'static str>,
    fallback: Option<FallbackHandler>,
    blocks: BlockTypeRegistry,
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();
        let mut types: Vec<_> = self.types.keys().collect();
        types.sort();
        f.debug_struct("DispatchTable")
            .field("methods", &methods)
            .field("types", &types)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `T` known to the table: its block id and its base type
    pub fn declare<T: PayloadType>(&mut self) -> CodecResult<()> {
        self.blocks.register::<T>()?;
        if let Some(base) = T::BASE_TYPE {
            self.bases.insert(T::TYPE_NAME, base);
        }
        Ok(())
    }

    /// Handle payloads of type `T` (and of types declaring `T` as a base)
    pub fn on_type<T, R, F, Fut>(&mut self, handler: F) -> CodecResult<()>
    where
        T: PayloadType,
        R: PayloadType,
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        self.declare::<T>()?;
        self.types.insert(T::TYPE_NAME, typed_handler(handler));
        Ok(())
    }

    /// Handle messages addressed to `method`, reading the payload as `T`
    pub fn on_method<T, R, F, Fut>(&mut self, method: impl Into<String>, handler: F) -> CodecResult<()>
    where
        T: PayloadType,
        R: PayloadType,
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        self.declare::<T>()?;
        self.methods.insert(method.into(), typed_handler(handler));
        Ok(())
    }

    /// Handle anything no other entry matched
    pub fn set_fallback<F, Fut>(&mut self, handler: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Payload>> + Send + 'static,
    {
        self.fallback = Some(Arc::new(move |message| {
            let call = handler(message);
            async move { call.await.map_err(to_remote_error) }.boxed()
        }));
    }

    /// Type name of an inbound payload as this table sees it
    pub fn payload_type_name<'a>(&'a self, payload: &'a Payload) -> Option<&'a str> {
        match payload {
            Payload::Empty => Some(<() as PayloadType>::TYPE_NAME),
            Payload::Block(raw) => self.blocks.type_name(raw.block_type),
            _ => payload.type_name(),
        }
    }

    fn base_of(&self, type_name: &str) -> Option<&'static str> {
        self.bases.get(type_name).copied().or_else(|| {
            self.blocks
                .block_type(type_name)
                .and_then(|id| self.blocks.info(id))
                .and_then(|info| info.base_type)
        })
    }

    fn lookup(&self, message: &Message) -> (Route, Option<(ErasedHandler, ReadMode)>) {
        let method = &message.destination_method;
        if !method.is_empty() {
            if let Some(handler) = self.methods.get(method.as_str()) {
                return (Route::Method(method.clone()), Some((handler.clone(), ReadMode::Exact)));
            }
        }

        if let Some(declared) = self.payload_type_name(&message.payload) {
            if let Some(handler) = self.types.get(declared) {
                return (Route::Exact(declared.to_string()), Some((handler.clone(), ReadMode::Exact)));
            }
            let mut current = self.base_of(declared);
            let mut depth = 0;
            while let Some(base) = current {
                if depth == MAX_BASE_DEPTH {
                    break;
                }
                if let Some(handler) = self.types.get(base) {
                    let route = Route::Base {
                        declared: declared.to_string(),
                        handled_as: base.to_string(),
                    };
                    return (route, Some((handler.clone(), ReadMode::AsBase)));
                }
                current = self.base_of(base);
                depth += 1;
            }
        }

        if self.fallback.is_some() {
            return (Route::Fallback, None);
        }

        let target = if method.is_empty() {
            self.payload_type_name(&message.payload)
                .map(str::to_string)
                .unwrap_or_else(|| describe(&message.payload))
        } else {
            method.clone()
        };
        (Route::NotImplemented(target), None)
    }

    /// Which entry would serve `message`
    pub fn route(&self, message: &Message) -> Route {
        self.lookup(message).0
    }

    /// Run the matching handler
    ///
    /// Never panics and never fails outright: every failure is folded into
    /// the returned `RemoteError`.
    pub fn invoke(&self, message: &Message) -> HandlerFuture {
        let (route, handler) = self.lookup(message);
        let call = match (route, handler) {
            (_, Some((handler, mode))) => {
                let ctx = RequestContext::from_message(message);
                let payload = &message.payload;
                match std::panic::catch_unwind(AssertUnwindSafe(|| handler(ctx, payload, mode))) {
                    Ok(call) => call,
                    Err(panic) => {
                        let err = RemoteError::unhandled(panic_message(panic.as_ref()));
                        return async move { Err(err) }.boxed();
                    }
                }
            }
            (Route::Fallback, None) => match &self.fallback {
                Some(fallback) => fallback(message.clone()),
                None => async { Err(RemoteError::unhandled("fallback vanished")) }.boxed(),
            },
            (Route::NotImplemented(target), None) => {
                let err = RemoteError::not_implemented(target);
                return async move { Err(err) }.boxed();
            }
            (route, None) => {
                let err = RemoteError::unhandled(format!("no handler for route {route:?}"));
                return async move { Err(err) }.boxed();
            }
        };

        let request_id = message.request_id;
        async move {
            match AssertUnwindSafe(call).catch_unwind().await {
                Ok(Ok(payload)) => Ok(payload),
                Ok(Err(err)) => {
                    if err.code == ErrorCode::UnhandledException {
                        error!(request_id, error = %err, "Handler failed");
                    }
                    Err(err)
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(request_id, panic = %message, "Handler panicked");
                    Err(RemoteError::unhandled(message))
                }
            }
        }
        .boxed()
    }

    pub fn block_types(&self) -> &BlockTypeRegistry {
        &self.blocks
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {text}")
    } else if let Some(text) = panic.downcast_ref::<String>() {
        format!("handler panicked: {text}")
    } else {
        "handler panicked".to_string()
    }
}
