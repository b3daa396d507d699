//! Core data types carried by discovery services.
//!
//! Byte strings (certificates, nonces) are carried as base64 text so the
//! types stay transport-neutral.

use serde::{Deserialize, Serialize};

use crate::security::SecurityMode;

/// Base64 helpers for optional byte strings.
pub mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => {
                serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text: Option<String> = Option::deserialize(deserializer)?;
        text.map(|t| {
            base64::engine::general_purpose::STANDARD
                .decode(t)
                .map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}

/// OPC UA status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const GOOD: StatusCode = StatusCode(0);
    pub const BAD_TIMEOUT: StatusCode = StatusCode(0x800A_0000);
    pub const BAD_SERVICE_UNSUPPORTED: StatusCode = StatusCode(0x800B_0000);
    pub const BAD_SECURE_CHANNEL_CLOSED: StatusCode = StatusCode(0x8086_0000);

    pub fn is_good(self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    pub fn is_bad(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Human readable text with an optional locale.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalizedText {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    pub text: String,
}

impl LocalizedText {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            locale: None,
            text: text.into(),
        }
    }
}

/// Kind of application described by an [`ApplicationDescription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ApplicationType {
    #[default]
    Server,
    Client,
    ClientAndServer,
    DiscoveryServer,
}

/// Description of a server or client application.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationDescription {
    pub application_uri: String,
    pub product_uri: String,
    pub application_name: LocalizedText,
    pub application_type: ApplicationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_server_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery_profile_uri: Option<String>,
    pub discovery_urls: Vec<String>,
}

/// Kind of user identity token accepted by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UserTokenType {
    #[default]
    Anonymous,
    UserName,
    Certificate,
    IssuedToken,
}

/// User identity token policy advertised by an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserTokenPolicy {
    pub policy_id: String,
    pub token_type: UserTokenType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer_endpoint_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_policy_uri: Option<String>,
}

/// Endpoint descriptor returned by `GetEndpoints`.
///
/// `endpoint_url`, `security_mode` and `security_policy_uri` identify the
/// endpoint; the remaining fields are passed through as supplied by the server.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointDescription {
    pub endpoint_url: String,
    pub server: ApplicationDescription,
    #[serde(
        with = "base64_bytes",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub server_certificate: Option<Vec<u8>>,
    pub security_mode: SecurityMode,
    pub security_policy_uri: String,
    pub user_identity_tokens: Vec<UserTokenPolicy>,
    pub transport_profile_uri: String,
    pub security_level: u8,
}

/// Header attached to every service request.
///
/// The audit fields default to empty; the channel fills in `request_handle`
/// and `timestamp` when it sends the request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestHeader {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication_token: Option<String>,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub request_handle: u32,
    pub return_diagnostics: u32,
    pub audit_entry_id: String,
    /// Milliseconds; zero means no hint
    pub timeout_hint: u32,
}

impl RequestHeader {
    /// Header with default audit fields and the current time.
    pub fn now() -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Self {
            timestamp,
            ..Self::default()
        }
    }
}

/// Header attached to every service response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseHeader {
    pub timestamp: i64,
    pub request_handle: u32,
    pub service_result: StatusCode,
    pub string_table: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_code_severity() {
        assert!(StatusCode::GOOD.is_good());
        assert!(StatusCode::BAD_TIMEOUT.is_bad());
        assert!(!StatusCode::BAD_TIMEOUT.is_good());
        assert_eq!(StatusCode::BAD_TIMEOUT.to_string(), "0x800A0000");
    }

    #[test]
    fn endpoint_description_from_wire() {
        let endpoint: EndpointDescription = serde_json::from_value(json!({
            "endpointUrl": "opc.tcp://host:4840",
            "securityMode": "SignAndEncrypt",
            "securityPolicyUri": "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256",
            "serverCertificate": "AQID",
            "securityLevel": 3,
            "server": {
                "applicationUri": "urn:host:server",
                "applicationName": { "text": "Demo" },
                "discoveryUrls": ["opc.tcp://host:4840"]
            },
            "vendorSpecific": true
        }))
        .unwrap();

        assert_eq!(endpoint.endpoint_url, "opc.tcp://host:4840");
        assert_eq!(endpoint.security_mode, SecurityMode::SignAndEncrypt);
        assert_eq!(endpoint.server_certificate.as_deref(), Some(&[1u8, 2, 3][..]));
        assert_eq!(endpoint.server.application_name.text, "Demo");
        assert_eq!(endpoint.server.application_type, ApplicationType::Server);
        assert!(endpoint.user_identity_tokens.is_empty());
    }

    #[test]
    fn request_header_defaults_audit_fields() {
        let header = RequestHeader::now();
        assert!(header.timestamp > 0);
        assert!(header.audit_entry_id.is_empty());
        assert_eq!(header.request_handle, 0);
        assert!(header.authentication_token.is_none());
    }
}
