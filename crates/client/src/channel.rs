//! Secure channel contract.
//!
//! The client never implements message chunking, signing or token renewal
//! itself. It drives a [`SecureChannel`] built by a [`SecureChannelFactory`]
//! and listens to the notifications the channel pushes into the
//! [`ChannelListener`] it was constructed with.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use opcua_protocol::{Request, Response, SecurityMode, SecurityPolicy};

use crate::error::{Error, Result};
use crate::object_factory::ObjectFactory;

/// Boxed future returned by the channel and session contracts.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Notification emitted by a secure channel.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    SendChunk(Arc<[u8]>),
    ReceiveChunk(Arc<[u8]>),
    SendRequest(Arc<Request>),
    ReceiveResponse(Arc<Response>),
    /// Fired once when 25% of the token lifetime remains.
    LifetimeExpiring,
    SecurityTokenRenewed,
    TimedOutRequest(Arc<Request>),
    /// Emitted once when the channel goes away; carries the cause if abnormal.
    Close(Option<Arc<Error>>),
}

/// Receiver of channel notifications.
///
/// Registered with the channel at construction time. Implementations must not
/// block; the channel may call this from its I/O task.
pub trait ChannelListener: Send + Sync {
    fn on_channel_event(&self, event: ChannelEvent);
}

/// Traffic counters of a secure channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelCounters {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub transactions_performed: u64,
    pub timed_out_request_count: u64,
}

/// Everything a channel needs at construction.
#[derive(Clone)]
pub struct ChannelOptions {
    pub default_secure_token_lifetime: Duration,
    pub security_mode: SecurityMode,
    pub security_policy: SecurityPolicy,
    pub server_certificate: Option<Vec<u8>>,
    /// Back-reference to the owning connection.
    pub listener: Arc<dyn ChannelListener>,
    /// Decodes response bodies by type id.
    pub object_factory: Arc<dyn ObjectFactory>,
}

impl std::fmt::Debug for ChannelOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelOptions")
            .field(
                "default_secure_token_lifetime",
                &self.default_secure_token_lifetime,
            )
            .field("security_mode", &self.security_mode)
            .field("security_policy", &self.security_policy)
            .field(
                "server_certificate",
                &self.server_certificate.as_ref().map(Vec::len),
            )
            .finish_non_exhaustive()
    }
}

/// A single secure channel to a server.
pub trait SecureChannel: Send + Sync {
    /// Opens the channel (HEL/ACK plus OpenSecureChannel).
    fn create(&self, endpoint_url: &str) -> BoxFuture<'_, Result<()>>;

    /// Closes the channel. Pending transactions fail.
    fn close(&self) -> BoxFuture<'_, Result<()>>;

    /// Sends `request` and resolves with the decoded response.
    ///
    /// Per-request timeouts are the channel's business: a timed-out request
    /// fails with [`Error::Timeout`] and is reported as
    /// [`ChannelEvent::TimedOutRequest`].
    fn perform_transaction(&self, request: Request) -> BoxFuture<'_, Result<Response>>;

    fn bytes_read(&self) -> u64;

    fn bytes_written(&self) -> u64;

    fn transactions_performed(&self) -> u64;

    fn timed_out_request_count(&self) -> u64;

    fn counters(&self) -> ChannelCounters {
        ChannelCounters {
            bytes_read: self.bytes_read(),
            bytes_written: self.bytes_written(),
            transactions_performed: self.transactions_performed(),
            timed_out_request_count: self.timed_out_request_count(),
        }
    }
}

/// Builds secure channels for a connection.
pub trait SecureChannelFactory: Send + Sync {
    fn create_channel(&self, options: ChannelOptions) -> Arc<dyn SecureChannel>;
}
