//! Request/Response Correlation
//!
//! Each Proxy Port owns one [`CorrelationTable`]. Sending a request registers
//! a [`PendingOperation`] under a fresh request id; the matching Response or
//! Error removes the entry and completes it.
//!
//! ## Invariants
//! - No two live entries share a request id; the counter skips 0 and any id
//!   still pending when it wraps
//! - An entry completes at most once; late or duplicate answers are logged
//!   and dropped
//! - [`CorrelationTable::fail_all`] resolves entries in registration order
//!
//! There is no built-in timeout. [`CorrelationTable::ages`] exposes how long
//! each entry has been waiting so a caller-side watchdog can decide.

use crate::error::{PortError, Result};
use parking_lot::Mutex;
use port_types::{Message, MessageType, PayloadType, RequestId, NOTIFICATION_ID};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

type Completion = oneshot::Sender<Result<Message>>;

struct Entry {
    seq: u64,
    created: Instant,
    expected_type: &'static str,
    completion: Completion,
}

struct TableInner {
    next_id: RequestId,
    next_seq: u64,
    pending: HashMap<RequestId, Entry>,
}

/// Pending-request table owned by one Proxy Port
pub struct CorrelationTable {
    port: String,
    max_id: RequestId,
    inner: Mutex<TableInner>,
}

impl CorrelationTable {
    /// Table whose ids wrap after `max_id`
    pub fn new(port: impl Into<String>, max_id: RequestId) -> Self {
        Self {
            port: port.into(),
            max_id: max_id.max(1),
            inner: Mutex::new(TableInner {
                next_id: 1,
                next_seq: 0,
                pending: HashMap::new(),
            }),
        }
    }

    /// Allocate an id and record a pending operation expecting `R`
    pub fn register<R: PayloadType>(&self) -> Result<PendingOperation<R>> {
        let mut inner = self.inner.lock();
        if inner.pending.len() >= self.max_id as usize {
            return Err(PortError::misuse(format!(
                "all {} request ids are in flight",
                self.max_id
            )));
        }

        let mut id = inner.next_id;
        while id == NOTIFICATION_ID || inner.pending.contains_key(&id) {
            id = self.advance(id);
        }
        inner.next_id = self.advance(id);

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let created = Instant::now();
        let (completion, receiver) = oneshot::channel();
        inner.pending.insert(
            id,
            Entry {
                seq,
                created,
                expected_type: R::TYPE_NAME,
                completion,
            },
        );

        Ok(PendingOperation {
            request_id: id,
            created,
            receiver,
            _response: PhantomData,
        })
    }

    fn advance(&self, id: RequestId) -> RequestId {
        if id >= self.max_id {
            1
        } else {
            id + 1
        }
    }

    /// Deliver a Response or Error to its pending operation
    ///
    /// Returns false when no entry was waiting for the id.
    pub fn complete(&self, message: Message) -> bool {
        let entry = self.inner.lock().pending.remove(&message.request_id);
        match entry {
            Some(entry) => {
                debug!(
                    port = %self.port,
                    request_id = message.request_id,
                    expected_type = entry.expected_type,
                    waited_ms = entry.created.elapsed().as_millis() as u64,
                    "Request answered"
                );
                let _ = entry.completion.send(Ok(message));
                true
            }
            None => {
                warn!(
                    port = %self.port,
                    request_id = message.request_id,
                    message_type = ?message.message_type,
                    "Discarding answer for unknown or already resolved request"
                );
                false
            }
        }
    }

    /// Drop an entry whose request never left the port
    pub fn cancel(&self, request_id: RequestId) -> bool {
        self.inner.lock().pending.remove(&request_id).is_some()
    }

    /// Fail one entry
    pub fn fail(&self, request_id: RequestId, error: PortError) -> bool {
        let entry = self.inner.lock().pending.remove(&request_id);
        match entry {
            Some(entry) => {
                let _ = entry.completion.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Fail every entry in registration order, leaving the table empty
    pub fn fail_all(&self, error: PortError) -> usize {
        let mut entries: Vec<Entry> = self.inner.lock().pending.drain().map(|(_, e)| e).collect();
        entries.sort_by_key(|entry| entry.seq);
        let count = entries.len();
        for entry in entries {
            let _ = entry.completion.send(Err(error.clone()));
        }
        if count > 0 {
            debug!(port = %self.port, count, error = %error, "Failed pending requests");
        }
        count
    }

    /// Fail entries waiting longer than `max_age`, oldest first
    pub fn fail_older_than(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut expired: Vec<(RequestId, Entry)> = {
            let mut inner = self.inner.lock();
            let ids: Vec<RequestId> = inner
                .pending
                .iter()
                .filter(|(_, entry)| now.duration_since(entry.created) > max_age)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| inner.pending.remove(&id).map(|entry| (id, entry)))
                .collect()
        };
        expired.sort_by_key(|(_, entry)| entry.seq);

        let count = expired.len();
        for (request_id, entry) in expired {
            let age_ms = now.duration_since(entry.created).as_millis() as u64;
            warn!(port = %self.port, request_id, age_ms, "Failing stale request");
            let _ = entry.completion.send(Err(PortError::TimedOut { age_ms }));
        }
        count
    }

    /// Age of every pending entry, in registration order
    pub fn ages(&self) -> Vec<(RequestId, Duration)> {
        let inner = self.inner.lock();
        let mut entries: Vec<(u64, RequestId, Duration)> = inner
            .pending
            .iter()
            .map(|(id, entry)| (entry.seq, *id, entry.created.elapsed()))
            .collect();
        entries.sort_by_key(|(seq, _, _)| *seq);
        entries.into_iter().map(|(_, id, age)| (id, age)).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An in-flight request; await it for the typed answer
///
/// Resolves to the response payload read as `R`, to [`PortError::Remote`]
/// when the service answered with an Error, or to
/// [`PortError::TypeMismatch`] when the payload is not an `R`.
#[must_use = "a pending operation does nothing unless awaited"]
pub struct PendingOperation<R> {
    request_id: RequestId,
    created: Instant,
    receiver: oneshot::Receiver<Result<Message>>,
    _response: PhantomData<fn() -> R>,
}

impl<R> std::fmt::Debug for PendingOperation<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOperation")
            .field("request_id", &self.request_id)
            .field("age", &self.created.elapsed())
            .finish()
    }
}

impl<R: PayloadType> PendingOperation<R> {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    fn resolve(message: Message) -> Result<R> {
        if message.message_type == MessageType::Error {
            let error = message
                .remote_error()
                .ok_or_else(|| PortError::misuse("error message without descriptor"))?;
            return Err(PortError::Remote(error));
        }
        message.payload.try_read_as::<R>().ok_or_else(|| {
            let actual = message
                .payload
                .type_name()
                .map(str::to_string)
                .or_else(|| message.payload.block_type().map(|id| format!("block {id:#06x}")))
                .unwrap_or_else(|| "untyped".to_string());
            PortError::type_mismatch(R::TYPE_NAME, actual)
        })
    }
}

impl<R: PayloadType> Future for PendingOperation<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Ok(message))) => Poll::Ready(Self::resolve(message)),
            Poll::Ready(Ok(Err(error))) => Poll::Ready(Err(error)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(PortError::ConnectionClosed)),
        }
    }
}
