//! Message security modes and security policies.
//!
//! Both are closed sets. User-supplied spellings are normalized here so the
//! rest of the client only ever sees the typed values.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const POLICY_URI_PREFIX: &str = "http://opcfoundation.org/UA/SecurityPolicy#";

/// Error returned when a security mode or policy cannot be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseSecurityError {
    #[error("unknown security mode '{0}'")]
    UnknownMode(String),

    #[error("unknown security policy '{0}'")]
    UnknownPolicy(String),
}

/// Message security mode of a secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SecurityMode {
    /// No signing, no encryption
    #[default]
    None,
    /// Messages are signed but not encrypted
    Sign,
    /// Messages are signed and encrypted
    SignAndEncrypt,
}

impl SecurityMode {
    /// Numeric value used by the binary encoding.
    pub fn value(self) -> u32 {
        match self {
            SecurityMode::None => 1,
            SecurityMode::Sign => 2,
            SecurityMode::SignAndEncrypt => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SecurityMode::None => "None",
            SecurityMode::Sign => "Sign",
            SecurityMode::SignAndEncrypt => "SignAndEncrypt",
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityMode {
    type Err = ParseSecurityError;

    /// Accepts the enumeration name (any case), the `Name_N` form used by
    /// some servers, or the bare numeric value.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let name = trimmed.split('_').next().unwrap_or(trimmed);
        match name.to_ascii_lowercase().as_str() {
            "none" | "1" => Ok(SecurityMode::None),
            "sign" | "2" => Ok(SecurityMode::Sign),
            "signandencrypt" | "3" => Ok(SecurityMode::SignAndEncrypt),
            _ => Err(ParseSecurityError::UnknownMode(s.to_string())),
        }
    }
}

/// Named cryptographic policy of a secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SecurityPolicy {
    #[default]
    None,
    Basic128Rsa15,
    Basic256,
    Basic256Sha256,
    Aes128Sha256RsaOaep,
    Aes256Sha256RsaPss,
}

impl SecurityPolicy {
    pub const ALL: [SecurityPolicy; 6] = [
        SecurityPolicy::None,
        SecurityPolicy::Basic128Rsa15,
        SecurityPolicy::Basic256,
        SecurityPolicy::Basic256Sha256,
        SecurityPolicy::Aes128Sha256RsaOaep,
        SecurityPolicy::Aes256Sha256RsaPss,
    ];

    /// Short name as it appears after the `#` in the policy URI.
    pub fn name(self) -> &'static str {
        match self {
            SecurityPolicy::None => "None",
            SecurityPolicy::Basic128Rsa15 => "Basic128Rsa15",
            SecurityPolicy::Basic256 => "Basic256",
            SecurityPolicy::Basic256Sha256 => "Basic256Sha256",
            SecurityPolicy::Aes128Sha256RsaOaep => "Aes128_Sha256_RsaOaep",
            SecurityPolicy::Aes256Sha256RsaPss => "Aes256_Sha256_RsaPss",
        }
    }

    /// Full policy URI, e.g. `http://opcfoundation.org/UA/SecurityPolicy#None`.
    pub fn uri(self) -> String {
        format!("{POLICY_URI_PREFIX}{}", self.name())
    }

    /// Returns true if `uri` names this policy.
    pub fn matches_uri(self, uri: &str) -> bool {
        uri.strip_prefix(POLICY_URI_PREFIX) == Some(self.name())
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SecurityPolicy {
    type Err = ParseSecurityError;

    /// Accepts a full policy URI or a short name (case-insensitive, with or
    /// without underscores).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let name = trimmed.strip_prefix(POLICY_URI_PREFIX).unwrap_or(trimmed);
        let wanted = name.replace('_', "").to_ascii_lowercase();

        SecurityPolicy::ALL
            .into_iter()
            .find(|policy| policy.name().replace('_', "").to_ascii_lowercase() == wanted)
            .ok_or_else(|| ParseSecurityError::UnknownPolicy(s.to_string()))
    }
}

impl TryFrom<String> for SecurityPolicy {
    type Error = ParseSecurityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SecurityPolicy> for String {
    fn from(policy: SecurityPolicy) -> Self {
        policy.uri()
    }
}
