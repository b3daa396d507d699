//! Wire types for the OPC UA client.
//!
//! This crate contains the serde-serializable types exchanged with a server
//! over a secure channel. Only the shapes of the data live here; the binary
//! encoding, chunking and cryptography belong to the channel implementation.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization and normalization
//! - **1:1 with protocol**: Field names follow the OPC UA Part 4 services
//! - **Stable**: Changes only when the wire protocol changes
//!
//! The connection lifecycle built on top of these types lives in `opcua-client`.

pub mod messages;
pub mod security;
pub mod types;

pub use messages::*;
pub use security::*;
pub use types::*;
