//! Discovery services: `GetEndpoints` and `FindServers`.
//!
//! Both build a typed request with a default header, submit it through the
//! secure channel and check the response type before taking its payload.

use opcua_protocol::{
    ApplicationDescription, EndpointDescription, FindServersRequest, GetEndpointsRequest,
    Request, RequestHeader, Response, ResponseHeader, SecurityMode, SecurityPolicy,
};

use crate::connection::ClientConnection;
use crate::error::{Error, Result};

/// Options for [`ClientConnection::get_endpoints`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetEndpointsOptions {
    /// Defaults to the connection's endpoint URL.
    pub endpoint_url: Option<String>,
    pub locale_ids: Vec<String>,
    pub profile_uris: Vec<String>,
}

/// Options for [`ClientConnection::find_servers`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindServersOptions {
    /// Defaults to the connection's endpoint URL.
    pub endpoint_url: Option<String>,
    pub locale_ids: Vec<String>,
    pub server_uris: Vec<String>,
}

fn check_header(header: &ResponseHeader) -> Result<()> {
    if header.service_result.is_bad() {
        return Err(Error::ServiceFault {
            status: header.service_result,
        });
    }
    Ok(())
}

fn unexpected(expected: &'static str, response: Response) -> Error {
    match response {
        Response::ServiceFault(fault) => Error::ServiceFault {
            status: fault.response_header.service_result,
        },
        other => Error::UnexpectedResponse {
            expected,
            actual: other.name(),
        },
    }
}

impl ClientConnection {
    /// Asks the server for its endpoints and caches the result.
    ///
    /// On success the cached catalog is replaced; on any failure it is
    /// cleared before the error is returned.
    pub async fn get_endpoints(
        &self,
        options: GetEndpointsOptions,
    ) -> Result<Vec<EndpointDescription>> {
        let request = Request::GetEndpoints(GetEndpointsRequest {
            request_header: RequestHeader::now(),
            endpoint_url: options
                .endpoint_url
                .or_else(|| self.endpoint_url())
                .unwrap_or_default(),
            locale_ids: options.locale_ids,
            profile_uris: options.profile_uris,
        });

        let result = match self.perform_message_transaction(request).await {
            Ok(Response::GetEndpoints(response)) => {
                check_header(&response.response_header).map(|()| response.endpoints)
            }
            Ok(other) => Err(unexpected("GetEndpointsResponse", other)),
            Err(err) => Err(err),
        };

        match result {
            Ok(endpoints) => {
                tracing::debug!(
                    connection = %self.id(),
                    count = endpoints.len(),
                    "Endpoints discovered"
                );
                self.endpoint_catalog().replace(endpoints.clone());
                Ok(endpoints)
            }
            Err(err) => {
                self.endpoint_catalog().clear();
                Err(err)
            }
        }
    }

    /// Asks the server for the servers it knows about.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSecureChannel`] without sending anything if the
    /// connection has no secure channel.
    pub async fn find_servers(
        &self,
        options: FindServersOptions,
    ) -> Result<Vec<ApplicationDescription>> {
        if !self.has_secure_channel() {
            tokio::task::yield_now().await;
            return Err(Error::InvalidSecureChannel);
        }

        let request = Request::FindServers(FindServersRequest {
            request_header: RequestHeader::now(),
            endpoint_url: options
                .endpoint_url
                .or_else(|| self.endpoint_url())
                .unwrap_or_default(),
            locale_ids: options.locale_ids,
            server_uris: options.server_uris,
        });

        match self.perform_message_transaction(request).await? {
            Response::FindServers(response) => {
                check_header(&response.response_header)?;
                Ok(response.servers)
            }
            other => Err(unexpected("FindServersResponse", other)),
        }
    }

    /// Looks up a cached endpoint. Never touches the network.
    pub fn find_endpoint(
        &self,
        endpoint_url: &str,
        security_mode: SecurityMode,
        security_policy: SecurityPolicy,
    ) -> Option<EndpointDescription> {
        self.endpoint_catalog()
            .find(endpoint_url, security_mode, security_policy)
    }

    /// Snapshot of the cached catalog; `None` until discovery succeeds.
    pub fn endpoints(&self) -> Option<Vec<EndpointDescription>> {
        self.endpoint_catalog().snapshot()
    }
}
