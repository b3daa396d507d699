//! Object factory - decodes response bodies from their type identifiers.
//!
//! The secure channel knows the numeric encoding id of every message it
//! receives but not the Rust type behind it. It hands `(type_id, body)` to
//! the [`ObjectFactory`] it was constructed with and gets a typed
//! [`Response`] back.

use opcua_protocol::{
    FindServersResponse, GetEndpointsResponse, Response, ServiceFault, TypeId,
};
use serde_json::Value;

use crate::error::{Error, Result};

/// Maps wire type ids to typed responses.
pub trait ObjectFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns [`Error::UnknownType`] for ids this factory cannot decode and
    /// [`Error::Json`] if the body does not match the type.
    fn create_response(&self, type_id: u32, body: Value) -> Result<Response>;
}

/// Factory for the services the connection itself uses.
///
/// Ids listed in `passthrough` are returned as [`Response::Other`] instead of
/// being rejected, for callers that decode their own services.
#[derive(Debug, Clone, Default)]
pub struct StandardObjectFactory {
    passthrough: Vec<u32>,
}

impl StandardObjectFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_passthrough(mut self, type_id: u32) -> Self {
        self.passthrough.push(type_id);
        self
    }
}

impl ObjectFactory for StandardObjectFactory {
    fn create_response(&self, type_id: u32, body: Value) -> Result<Response> {
        let response = match type_id {
            TypeId::GET_ENDPOINTS_RESPONSE => {
                Response::GetEndpoints(serde_json::from_value::<GetEndpointsResponse>(body)?)
            }
            TypeId::FIND_SERVERS_RESPONSE => {
                Response::FindServers(serde_json::from_value::<FindServersResponse>(body)?)
            }
            TypeId::SERVICE_FAULT => {
                Response::ServiceFault(serde_json::from_value::<ServiceFault>(body)?)
            }
            id if self.passthrough.contains(&id) => Response::Other { type_id: id, body },
            id => return Err(Error::UnknownType(id)),
        };
        tracing::trace!(type_id, name = response.name(), "Decoded response");
        Ok(response)
    }
}
