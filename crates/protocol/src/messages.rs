//! Service request and response messages.
//!
//! Each message is identified on the wire by the numeric id of its binary
//! encoding node. The channel hands responses to an object factory keyed by
//! that id, which produces the typed [`Response`] union below.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ApplicationDescription, EndpointDescription, RequestHeader, ResponseHeader};

/// Binary-encoding type identifiers (namespace 0).
pub struct TypeId;

impl TypeId {
    pub const SERVICE_FAULT: u32 = 397;
    pub const FIND_SERVERS_REQUEST: u32 = 422;
    pub const FIND_SERVERS_RESPONSE: u32 = 425;
    pub const GET_ENDPOINTS_REQUEST: u32 = 428;
    pub const GET_ENDPOINTS_RESPONSE: u32 = 431;
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetEndpointsRequest {
    pub request_header: RequestHeader,
    pub endpoint_url: String,
    pub locale_ids: Vec<String>,
    pub profile_uris: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetEndpointsResponse {
    pub response_header: ResponseHeader,
    pub endpoints: Vec<EndpointDescription>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FindServersRequest {
    pub request_header: RequestHeader,
    pub endpoint_url: String,
    pub locale_ids: Vec<String>,
    pub server_uris: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FindServersResponse {
    pub response_header: ResponseHeader,
    pub servers: Vec<ApplicationDescription>,
}

/// Generic failure reply; the status lives in `response_header.service_result`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceFault {
    pub response_header: ResponseHeader,
}

/// A request submitted through the secure channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body")]
pub enum Request {
    GetEndpoints(GetEndpointsRequest),
    FindServers(FindServersRequest),
    /// Any other service, already shaped by the caller.
    Other { type_id: u32, body: Value },
}

impl Request {
    pub fn type_id(&self) -> u32 {
        match self {
            Request::GetEndpoints(_) => TypeId::GET_ENDPOINTS_REQUEST,
            Request::FindServers(_) => TypeId::FIND_SERVERS_REQUEST,
            Request::Other { type_id, .. } => *type_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Request::GetEndpoints(_) => "GetEndpointsRequest",
            Request::FindServers(_) => "FindServersRequest",
            Request::Other { .. } => "Request",
        }
    }
}

/// A response decoded by the object factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body")]
pub enum Response {
    GetEndpoints(GetEndpointsResponse),
    FindServers(FindServersResponse),
    ServiceFault(ServiceFault),
    Other { type_id: u32, body: Value },
}

impl Response {
    pub fn type_id(&self) -> u32 {
        match self {
            Response::GetEndpoints(_) => TypeId::GET_ENDPOINTS_RESPONSE,
            Response::FindServers(_) => TypeId::FIND_SERVERS_RESPONSE,
            Response::ServiceFault(_) => TypeId::SERVICE_FAULT,
            Response::Other { type_id, .. } => *type_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Response::GetEndpoints(_) => "GetEndpointsResponse",
            Response::FindServers(_) => "FindServersResponse",
            Response::ServiceFault(_) => "ServiceFault",
            Response::Other { .. } => "Response",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_type_ids() {
        let request = Request::GetEndpoints(GetEndpointsRequest::default());
        assert_eq!(request.type_id(), 428);
        assert_eq!(request.name(), "GetEndpointsRequest");

        let other = Request::Other {
            type_id: 631,
            body: json!({}),
        };
        assert_eq!(other.type_id(), 631);
    }

    #[test]
    fn find_servers_response_from_wire() {
        let response: FindServersResponse = serde_json::from_value(json!({
            "responseHeader": { "serviceResult": 0 },
            "servers": [
                { "applicationUri": "urn:a", "applicationType": "DiscoveryServer" },
                { "applicationUri": "urn:b" }
            ]
        }))
        .unwrap();

        assert_eq!(response.servers.len(), 2);
        assert_eq!(response.servers[0].application_uri, "urn:a");
        assert!(response.response_header.service_result.is_good());
    }

    #[test]
    fn request_json_shape() {
        let request = Request::FindServers(FindServersRequest {
            endpoint_url: "opc.tcp://host:4840".to_string(),
            ..Default::default()
        });
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "FindServers");
        assert_eq!(value["body"]["endpointUrl"], "opc.tcp://host:4840");
        assert_eq!(value["body"]["serverUris"], json!([]));
    }
}
