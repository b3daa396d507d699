//! In-memory secure channel and session doubles.
//!
//! Lets the connection lifecycle be exercised without a server:
//! - [`FakeChannelFactory`] builds [`FakeChannel`]s and shares a script with
//!   its [`FakeChannelController`]
//! - [`FakeChannelController`] scripts create/close/transaction outcomes,
//!   records requests and injects channel notifications
//! - [`FakeSession`] is a session that deregisters itself on close
//!
//! # Example
//!
//! ```ignore
//! let (factory, controller) = FakeChannelFactory::build();
//! let connection = ClientConnection::new(ConnectionSettings::default(), factory);
//!
//! controller.set_endpoints(vec![endpoint]);
//! connection.connect("opc.tcp://localhost:4840").await?;
//! assert_eq!(controller.requests().len(), 1);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use opcua_protocol::{
    ApplicationDescription, EndpointDescription, FindServersResponse, GetEndpointsResponse,
    Request, Response,
};
use parking_lot::Mutex;
use serde_json::Value;

use crate::channel::{
    BoxFuture, ChannelEvent, ChannelOptions, SecureChannel, SecureChannelFactory,
};
use crate::connection::ClientConnection;
use crate::error::{Error, Result};
use crate::session::{Session, SessionOwner};

/// Size of a HEL message with an empty endpoint URL.
const HELLO_SIZE: u64 = 32;
/// Size of an ACK message.
const ACKNOWLEDGE_SIZE: u64 = 28;

/// Scripted outcome of one transaction.
#[derive(Debug)]
pub enum FakeReply {
    /// Resolve with an already decoded response.
    Response(Response),
    /// Decode `body` through the channel's object factory.
    Wire { type_id: u32, body: Value },
    /// Fail the transaction.
    Fail(Error),
    /// Time the request out, counting it and notifying listeners.
    Timeout,
    /// Answer with the response, but drop the channel before it is delivered.
    CloseAfter(Response),
}

#[derive(Default)]
struct FakeShared {
    create_results: Mutex<VecDeque<Result<()>>>,
    close_results: Mutex<VecDeque<Result<()>>>,
    replies: Mutex<VecDeque<FakeReply>>,
    endpoints: Mutex<Vec<EndpointDescription>>,
    servers: Mutex<Vec<ApplicationDescription>>,
    requests: Mutex<Vec<Request>>,
    channels: Mutex<Vec<Arc<FakeChannel>>>,
    close_on_create_failure: AtomicBool,
}

/// Builds [`FakeChannel`]s.
pub struct FakeChannelFactory {
    shared: Arc<FakeShared>,
}

impl FakeChannelFactory {
    /// Returns the factory to hand to a connection and its controller.
    pub fn build() -> (Arc<Self>, FakeChannelController) {
        let shared = Arc::new(FakeShared::default());
        let factory = Arc::new(Self {
            shared: Arc::clone(&shared),
        });
        (factory, FakeChannelController { shared })
    }
}

impl SecureChannelFactory for FakeChannelFactory {
    fn create_channel(&self, options: ChannelOptions) -> Arc<dyn SecureChannel> {
        let channel = Arc::new(FakeChannel {
            shared: Arc::clone(&self.shared),
            options,
            open: AtomicBool::new(false),
            endpoint_url: Mutex::new(None),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            transactions_performed: AtomicU64::new(0),
            timed_out_request_count: AtomicU64::new(0),
        });
        self.shared.channels.lock().push(Arc::clone(&channel));
        channel
    }
}

/// Scripts and inspects the channels built by a [`FakeChannelFactory`].
#[derive(Clone)]
pub struct FakeChannelController {
    shared: Arc<FakeShared>,
}

impl FakeChannelController {
    /// Makes the next `create` fail with `err`.
    pub fn fail_next_create(&self, err: Error) {
        self.shared.create_results.lock().push_back(Err(err));
    }

    /// Makes the next `close` report `err` (the channel still closes).
    pub fn fail_next_close(&self, err: Error) {
        self.shared.close_results.lock().push_back(Err(err));
    }

    /// Also emit a close notification when `create` fails.
    pub fn close_on_create_failure(&self, enabled: bool) {
        self.shared
            .close_on_create_failure
            .store(enabled, Ordering::SeqCst);
    }

    /// Queues the outcome of the next transaction.
    ///
    /// Without a queued reply, `GetEndpoints` and `FindServers` answer from
    /// [`set_endpoints`](Self::set_endpoints) and
    /// [`set_servers`](Self::set_servers); other requests fail.
    pub fn push_reply(&self, reply: FakeReply) {
        self.shared.replies.lock().push_back(reply);
    }

    pub fn set_endpoints(&self, endpoints: Vec<EndpointDescription>) {
        *self.shared.endpoints.lock() = endpoints;
    }

    pub fn set_servers(&self, servers: Vec<ApplicationDescription>) {
        *self.shared.servers.lock() = servers;
    }

    /// Every request submitted so far, across all channels.
    pub fn requests(&self) -> Vec<Request> {
        self.shared.requests.lock().clone()
    }

    pub fn channel_count(&self) -> usize {
        self.shared.channels.lock().len()
    }

    pub fn last_channel(&self) -> Option<Arc<FakeChannel>> {
        self.shared.channels.lock().last().cloned()
    }

    /// Pushes `event` through the most recent channel's listener.
    pub fn emit(&self, event: ChannelEvent) {
        if let Some(channel) = self.last_channel() {
            channel.emit(event);
        }
    }

    /// Simulates the peer dropping the most recent channel.
    pub fn drop_channel(&self, error: Option<Error>) {
        if let Some(channel) = self.last_channel() {
            channel.open.store(false, Ordering::SeqCst);
            channel.emit(ChannelEvent::Close(error.map(Arc::new)));
        }
    }
}

/// In-memory secure channel.
pub struct FakeChannel {
    shared: Arc<FakeShared>,
    options: ChannelOptions,
    open: AtomicBool,
    endpoint_url: Mutex<Option<String>>,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    transactions_performed: AtomicU64,
    timed_out_request_count: AtomicU64,
}

impl FakeChannel {
    /// Options the connection built this channel with.
    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn endpoint_url(&self) -> Option<String> {
        self.endpoint_url.lock().clone()
    }

    pub fn emit(&self, event: ChannelEvent) {
        self.options.listener.on_channel_event(event);
    }

    fn write_chunk(&self, len: u64) {
        self.bytes_written.fetch_add(len, Ordering::SeqCst);
        self.emit(ChannelEvent::SendChunk(Arc::from(vec![0u8; len as usize])));
    }

    fn read_chunk(&self, len: u64) {
        self.bytes_read.fetch_add(len, Ordering::SeqCst);
        self.emit(ChannelEvent::ReceiveChunk(Arc::from(vec![0u8; len as usize])));
    }

    fn default_reply(&self, request: &Request) -> FakeReply {
        match request {
            Request::GetEndpoints(_) => FakeReply::Response(Response::GetEndpoints(
                GetEndpointsResponse {
                    endpoints: self.shared.endpoints.lock().clone(),
                    ..Default::default()
                },
            )),
            Request::FindServers(_) => {
                FakeReply::Response(Response::FindServers(FindServersResponse {
                    servers: self.shared.servers.lock().clone(),
                    ..Default::default()
                }))
            }
            Request::Other { type_id, .. } => FakeReply::Fail(Error::Transport(format!(
                "no scripted reply for type id {type_id}"
            ))),
        }
    }

    async fn transact(&self, request: Request) -> Result<Response> {
        tokio::task::yield_now().await;
        if !self.is_open() {
            return Err(Error::ChannelClosed);
        }

        self.shared.requests.lock().push(request.clone());
        self.write_chunk(serde_json::to_vec(&request)?.len() as u64);
        let request = Arc::new(request);
        self.emit(ChannelEvent::SendRequest(Arc::clone(&request)));

        let queued = self.shared.replies.lock().pop_front();
        let reply = queued.unwrap_or_else(|| self.default_reply(&request));

        let response = match reply {
            FakeReply::Response(response) => response,
            FakeReply::Wire { type_id, body } => {
                self.options.object_factory.create_response(type_id, body)?
            }
            FakeReply::Fail(err) => return Err(err),
            FakeReply::Timeout => {
                self.timed_out_request_count.fetch_add(1, Ordering::SeqCst);
                self.emit(ChannelEvent::TimedOutRequest(Arc::clone(&request)));
                return Err(Error::Timeout(format!("{} timed out", request.name())));
            }
            FakeReply::CloseAfter(response) => {
                self.open.store(false, Ordering::SeqCst);
                self.emit(ChannelEvent::Close(None));
                // Let the connection's close follow-up run first.
                for _ in 0..4 {
                    tokio::task::yield_now().await;
                }
                response
            }
        };

        self.read_chunk(serde_json::to_vec(&response)?.len() as u64);
        self.transactions_performed.fetch_add(1, Ordering::SeqCst);
        self.emit(ChannelEvent::ReceiveResponse(Arc::new(response.clone())));
        Ok(response)
    }
}

impl SecureChannel for FakeChannel {
    fn create(&self, endpoint_url: &str) -> BoxFuture<'_, Result<()>> {
        let endpoint_url = endpoint_url.to_string();
        Box::pin(async move {
            tokio::task::yield_now().await;
            *self.endpoint_url.lock() = Some(endpoint_url.clone());

            let scripted = self.shared.create_results.lock().pop_front();
            if let Some(Err(err)) = scripted {
                if self.shared.close_on_create_failure.load(Ordering::SeqCst) {
                    self.emit(ChannelEvent::Close(Some(Arc::new(Error::ChannelCreation(
                        err.to_string(),
                    )))));
                }
                return Err(err);
            }

            self.write_chunk(HELLO_SIZE + endpoint_url.len() as u64);
            self.read_chunk(ACKNOWLEDGE_SIZE);
            self.open.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            let scripted = self.shared.close_results.lock().pop_front();
            self.open.store(false, Ordering::SeqCst);
            self.emit(ChannelEvent::Close(None));
            scripted.unwrap_or(Ok(()))
        })
    }

    fn perform_transaction(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
        Box::pin(self.transact(request))
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::SeqCst)
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::SeqCst)
    }

    fn transactions_performed(&self) -> u64 {
        self.transactions_performed.load(Ordering::SeqCst)
    }

    fn timed_out_request_count(&self) -> u64 {
        self.timed_out_request_count.load(Ordering::SeqCst)
    }
}

/// Session double that deregisters itself when closed.
pub struct FakeSession {
    name: String,
    owner: SessionOwner,
    close_failure: Mutex<Option<Error>>,
    deregister_on_close: AtomicBool,
    close_count: AtomicUsize,
}

impl FakeSession {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            owner: SessionOwner::new(),
            close_failure: Mutex::new(None),
            deregister_on_close: AtomicBool::new(true),
            close_count: AtomicUsize::new(0),
        })
    }

    /// Creates a session and registers it with `connection`.
    pub fn attach(connection: &ClientConnection, name: impl Into<String>) -> Arc<Self> {
        let session = Self::new(name);
        connection.add_session(Arc::clone(&session) as Arc<dyn Session>);
        session
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The next close reports `err` (it still deregisters).
    pub fn fail_close_with(&self, err: Error) {
        *self.close_failure.lock() = Some(err);
    }

    /// Breaks the session contract: close no longer deregisters.
    pub fn leak_on_close(&self) {
        self.deregister_on_close.store(false, Ordering::SeqCst);
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

impl Session for FakeSession {
    fn owner(&self) -> &SessionOwner {
        &self.owner
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.close_count.fetch_add(1, Ordering::SeqCst);
            if self.deregister_on_close.load(Ordering::SeqCst) {
                if let Some(connection) = self.owner.connection() {
                    connection.remove_session(self);
                }
            }
            match self.close_failure.lock().take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }
}
