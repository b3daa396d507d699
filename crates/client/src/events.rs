//! Connection notifications and the bus that publishes them.
//!
//! - [`ConnectionEvent`] - Everything a [`ClientConnection`] re-publishes
//! - [`EventBus`] - Internal dispatcher combining broadcast channels with predicate-based waiters
//! - [`EventStream`] - Wrapper around [`broadcast::Receiver`] with lag handling
//! - [`EventWaiter`] - One-shot event capture with timeout support
//!
//! Channel notifications are mapped one-to-one onto connection events by
//! the `From<ChannelEvent>` table below; payloads pass through untouched.
//!
//! [`ClientConnection`]: crate::ClientConnection
//! [`broadcast::Receiver`]: tokio::sync::broadcast::Receiver

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use opcua_protocol::{Request, Response};
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};

use crate::channel::ChannelEvent;
use crate::error::{Error, Result};

/// Notification published by a [`ClientConnection`](crate::ClientConnection).
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Raw chunk written to the socket.
    SendChunk(Arc<[u8]>),
    /// Raw chunk read from the socket.
    ReceiveChunk(Arc<[u8]>),
    /// Decoded request about to be sent.
    SendRequest(Arc<Request>),
    /// Decoded response just received.
    ReceiveResponse(Arc<Response>),
    /// Only 25% of the security token lifetime remains.
    LifetimeExpiring,
    /// The security token was renewed.
    SecurityTokenRenewed,
    /// A pending request timed out inside the channel.
    TimedOutRequest(Arc<Request>),
    /// The channel is gone. `error` is set when it dropped abnormally.
    Close { error: Option<Arc<Error>> },
}

impl ConnectionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionEvent::SendChunk(_) => "send_chunk",
            ConnectionEvent::ReceiveChunk(_) => "receive_chunk",
            ConnectionEvent::SendRequest(_) => "send_request",
            ConnectionEvent::ReceiveResponse(_) => "receive_response",
            ConnectionEvent::LifetimeExpiring => "lifetime_75",
            ConnectionEvent::SecurityTokenRenewed => "security_token_renewed",
            ConnectionEvent::TimedOutRequest(_) => "timed_out_request",
            ConnectionEvent::Close { .. } => "close",
        }
    }

    pub fn is_close(&self) -> bool {
        matches!(self, ConnectionEvent::Close { .. })
    }

    /// Cause of an abnormal close; `None` for every other event and for an
    /// orderly close.
    pub fn close_error(&self) -> Option<&Arc<Error>> {
        match self {
            ConnectionEvent::Close { error } => error.as_ref(),
            _ => None,
        }
    }
}

impl From<ChannelEvent> for ConnectionEvent {
    fn from(event: ChannelEvent) -> Self {
        match event {
            ChannelEvent::SendChunk(chunk) => ConnectionEvent::SendChunk(chunk),
            ChannelEvent::ReceiveChunk(chunk) => ConnectionEvent::ReceiveChunk(chunk),
            ChannelEvent::SendRequest(request) => ConnectionEvent::SendRequest(request),
            ChannelEvent::ReceiveResponse(response) => ConnectionEvent::ReceiveResponse(response),
            ChannelEvent::LifetimeExpiring => ConnectionEvent::LifetimeExpiring,
            ChannelEvent::SecurityTokenRenewed => ConnectionEvent::SecurityTokenRenewed,
            ChannelEvent::TimedOutRequest(request) => ConnectionEvent::TimedOutRequest(request),
            ChannelEvent::Close(error) => ConnectionEvent::Close { error },
        }
    }
}

struct WaiterEntry<E> {
    predicate: Box<dyn Fn(&E) -> bool + Send + Sync>,
    complete_tx: oneshot::Sender<E>,
}

/// Internal event bus combining broadcast channels with predicate-based waiters.
///
/// Waiters are checked first during [`emit`](Self::emit), so `wait_for_*`
/// calls see the event even when broadcast receivers are lagging.
pub(crate) struct EventBus<E: Clone + Send + 'static> {
    tx: broadcast::Sender<E>,
    waiters: Mutex<Vec<WaiterEntry<E>>>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Emits an event to all matching waiters, then to all subscribers.
    pub fn emit(&self, event: E) {
        {
            let mut waiters = self.waiters.lock();
            let mut i = 0;
            while i < waiters.len() {
                if (waiters[i].predicate)(&event) {
                    let entry = waiters.swap_remove(i);
                    let _ = entry.complete_tx.send(event.clone());
                } else {
                    i += 1;
                }
            }
        }
        let _ = self.tx.send(event);
    }

    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    /// Registers a waiter that will receive the first matching event.
    pub fn register_waiter<F>(&self, predicate: F) -> oneshot::Receiver<E>
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        let (complete_tx, complete_rx) = oneshot::channel();
        self.waiters.lock().push(WaiterEntry {
            predicate: Box::new(predicate),
            complete_tx,
        });
        complete_rx
    }

    #[allow(dead_code)]
    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EVENT_CAPACITY)
    }
}

/// Wrapper around [`broadcast::Receiver`] that logs and skips lag instead of
/// failing.
///
/// ```ignore
/// let mut events = connection.events();
/// while let Some(event) = events.recv().await {
///     println!("{}", event.kind());
/// }
/// ```
///
/// [`broadcast::Receiver`]: tokio::sync::broadcast::Receiver
pub struct EventStream<E: Clone + Send + 'static> {
    rx: broadcast::Receiver<E>,
}

impl<E: Clone + Send + 'static> EventStream<E> {
    pub(crate) fn new(rx: broadcast::Receiver<E>) -> Self {
        Self { rx }
    }

    /// Returns `None` once the connection is dropped.
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(dropped = n, "Event stream lagged, dropped events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<E> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!(dropped = n, "Event stream lagged, dropped events");
                }
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }
}

/// One-shot event waiter with timeout support.
pub struct EventWaiter<E> {
    rx: oneshot::Receiver<E>,
    timeout: Duration,
}

impl<E: Send + 'static> EventWaiter<E> {
    pub(crate) fn new(rx: oneshot::Receiver<E>, timeout: Duration) -> Self {
        Self { rx, timeout }
    }

    /// Waits for the event with the configured timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if no matching event arrives within the timeout
    /// - [`Error::ChannelClosed`] if the event source is dropped
    pub async fn wait(self) -> Result<E> {
        tokio::time::timeout(self.timeout, self.rx)
            .await
            .map_err(|_| Error::Timeout("Timeout waiting for connection event".to_string()))?
            .map_err(|_| Error::ChannelClosed)
    }
}

impl<E: Send + 'static> Future for EventWaiter<E> {
    type Output = Result<E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(event)) => Poll::Ready(Ok(event)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::ChannelClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}
