//! Cached endpoint catalog.

use opcua_protocol::{EndpointDescription, SecurityMode, SecurityPolicy};
use parking_lot::Mutex;

/// Endpoints returned by the last successful `GetEndpoints`.
///
/// The catalog is either unset or holds exactly one discovery result; it is
/// replaced wholesale, never merged.
#[derive(Debug, Default)]
pub(crate) struct EndpointCatalog {
    endpoints: Mutex<Option<Vec<EndpointDescription>>>,
}

impl EndpointCatalog {
    pub fn replace(&self, endpoints: Vec<EndpointDescription>) {
        *self.endpoints.lock() = Some(endpoints);
    }

    pub fn clear(&self) {
        *self.endpoints.lock() = None;
    }

    pub fn snapshot(&self) -> Option<Vec<EndpointDescription>> {
        self.endpoints.lock().clone()
    }

    /// First endpoint matching url, mode and policy URI exactly.
    pub fn find(
        &self,
        endpoint_url: &str,
        security_mode: SecurityMode,
        security_policy: SecurityPolicy,
    ) -> Option<EndpointDescription> {
        self.endpoints.lock().as_ref().and_then(|endpoints| {
            endpoints
                .iter()
                .find(|e| {
                    e.endpoint_url == endpoint_url
                        && e.security_mode == security_mode
                        && security_policy.matches_uri(&e.security_policy_uri)
                })
                .cloned()
        })
    }
}
