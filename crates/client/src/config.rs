//! Client configuration.
//!
//! [`ClientConfig`] is the loosely-typed shape read from JSON or built in
//! code. [`ClientConfig::validate`] normalizes it into [`ConnectionSettings`],
//! which is what [`ClientConnection`](crate::ClientConnection) consumes.

use std::path::Path;
use std::time::Duration;

use base64::Engine;
use opcua_protocol::{SecurityMode, SecurityPolicy};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default requested lifetime of a secure channel token.
pub const DEFAULT_SECURE_TOKEN_LIFETIME_MS: u64 = 600_000;

/// Default capacity of the connection event bus.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// User-facing client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Endpoint used by discovery when no explicit URL is given.
    pub endpoint_url: Option<String>,
    /// Requested secure channel token lifetime in milliseconds.
    pub default_secure_token_lifetime_ms: u64,
    /// Security mode name ("None", "Sign", "SignAndEncrypt").
    pub security_mode: String,
    /// Security policy short name or full URI.
    pub security_policy: String,
    /// DER server certificate, base64 encoded.
    pub server_certificate: Option<String>,
    /// Close registered sessions when the channel drops on its own.
    pub drain_sessions_on_channel_close: bool,
    /// Log every forwarded request and response.
    pub trace_messages: bool,
    /// Capacity of the broadcast channel behind the event bus.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            default_secure_token_lifetime_ms: DEFAULT_SECURE_TOKEN_LIFETIME_MS,
            security_mode: SecurityMode::None.to_string(),
            security_policy: SecurityPolicy::None.to_string(),
            server_certificate: None,
            drain_sessions_on_channel_close: true,
            trace_messages: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ClientConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Checks and normalizes the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the mode or policy is unknown, if
    /// exactly one of them is `None`, if the token lifetime is zero, or if the
    /// certificate is not valid base64.
    pub fn validate(&self) -> Result<ConnectionSettings> {
        let security_mode: SecurityMode = self.security_mode.parse()?;
        let security_policy: SecurityPolicy = self.security_policy.parse()?;

        if (security_mode == SecurityMode::None) != (security_policy == SecurityPolicy::None) {
            return Err(Error::InvalidConfig(format!(
                "security mode {security_mode} is incompatible with \
                 security policy {security_policy}"
            )));
        }

        if self.default_secure_token_lifetime_ms == 0 {
            return Err(Error::InvalidConfig(
                "defaultSecureTokenLifetimeMs must be greater than zero".to_string(),
            ));
        }

        let server_certificate = self
            .server_certificate
            .as_deref()
            .map(|text| {
                base64::engine::general_purpose::STANDARD
                    .decode(text.trim())
                    .map_err(|e| Error::InvalidConfig(format!("serverCertificate: {e}")))
            })
            .transpose()?;

        Ok(ConnectionSettings {
            endpoint_url: self.endpoint_url.clone(),
            default_secure_token_lifetime: Duration::from_millis(
                self.default_secure_token_lifetime_ms,
            ),
            security_mode,
            security_policy,
            server_certificate,
            drain_sessions_on_channel_close: self.drain_sessions_on_channel_close,
            trace_messages: self.trace_messages,
            event_capacity: self.event_capacity.max(1),
        })
    }
}

/// Validated settings handed to a [`ClientConnection`](crate::ClientConnection).
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub endpoint_url: Option<String>,
    pub default_secure_token_lifetime: Duration,
    pub security_mode: SecurityMode,
    pub security_policy: SecurityPolicy,
    pub server_certificate: Option<Vec<u8>>,
    pub drain_sessions_on_channel_close: bool,
    pub trace_messages: bool,
    pub event_capacity: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            default_secure_token_lifetime: Duration::from_millis(DEFAULT_SECURE_TOKEN_LIFETIME_MS),
            security_mode: SecurityMode::None,
            security_policy: SecurityPolicy::None,
            server_certificate: None,
            drain_sessions_on_channel_close: true,
            trace_messages: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}
