//! OPC UA client - connection, secure channel ownership and session lifecycle
//!
//! This crate manages the single secure channel a client keeps to a server
//! and everything that hangs off it:
//!
//! - **Connection**: Open channel, discover endpoints, orderly teardown
//! - **Sessions**: Registry of sessions multiplexed over the channel
//! - **Discovery**: `GetEndpoints` / `FindServers` and a cached endpoint catalog
//! - **Events**: Channel notifications re-published to connection observers
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ Session (extern) │  registers itself, deregisters on close
//! └────────┬─────────┘
//!          │
//! ┌────────▼─────────┐
//! │ ClientConnection │  This crate
//! │  ┌────────────┐  │
//! │  │ Registry   │  │  Sessions
//! │  └────────────┘  │
//! │  ┌────────────┐  │
//! │  │ Catalog    │  │  Endpoints
//! │  └────────────┘  │
//! │  ┌────────────┐  │
//! │  │ EventBus   │  │  Re-published notifications
//! │  └────────────┘  │
//! └────────┬─────────┘
//!          │ SecureChannelFactory
//! ┌────────▼─────────┐
//! │ SecureChannel    │  Chunking, crypto, token renewal (extern)
//! └──────────────────┘
//! ```
//!
//! # Decoupling via traits
//!
//! The secure channel, the response decoder and the sessions are all
//! supplied from outside through [`SecureChannelFactory`], [`ObjectFactory`]
//! and [`Session`]. The [`testing`] module provides in-memory versions.

pub mod channel;
pub mod config;
pub mod connection;
pub mod discovery;
mod endpoints;
pub mod error;
pub mod events;
pub mod object_factory;
pub mod session;
pub mod testing;

// Re-export key types at crate root
pub use channel::{
    BoxFuture, ChannelCounters, ChannelEvent, ChannelListener, ChannelOptions, SecureChannel,
    SecureChannelFactory,
};
pub use config::{ClientConfig, ConnectionSettings};
pub use connection::{ClientConnection, ConnectionId, ConnectionState, WeakClientConnection};
pub use discovery::{FindServersOptions, GetEndpointsOptions};
pub use error::{Error, Result};
pub use events::{ConnectionEvent, EventStream, EventWaiter};
pub use object_factory::{ObjectFactory, StandardObjectFactory};
pub use session::{Session, SessionOwner};

pub use opcua_protocol as protocol;
