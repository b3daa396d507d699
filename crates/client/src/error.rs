//! Error types for the OPC UA client.

use opcua_protocol::{ParseSecurityError, StatusCode};
use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while connecting, discovering or tearing down.
#[derive(Debug, Error)]
pub enum Error {
    /// `connect` was called while a secure channel already exists.
    #[error("Connection already established")]
    AlreadyConnected,

    /// An operation needed a secure channel and none exists.
    #[error("Invalid secure channel")]
    InvalidSecureChannel,

    /// The secure channel could not be opened.
    #[error("Failed to create secure channel: {0}")]
    ChannelCreation(String),

    /// Transport-level failure reported by the secure channel.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A transaction answered with a different message type than requested.
    #[error("Unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse {
        expected: &'static str,
        actual: &'static str,
    },

    /// The server answered with a service fault.
    #[error("Service fault: {status}")]
    ServiceFault { status: StatusCode },

    /// A request timed out inside the secure channel.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The secure channel closed while a request was pending.
    #[error("Secure channel closed unexpectedly")]
    ChannelClosed,

    /// Configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The object factory has no decoder for a response type id.
    #[error("Unknown response type id: {0}")]
    UnknownType(u32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::ServiceFault { status } => *status == StatusCode::BAD_TIMEOUT,
            _ => false,
        }
    }

    /// Returns true if the failure means the channel is gone.
    pub fn is_channel_closed(&self) -> bool {
        match self {
            Error::ChannelClosed | Error::InvalidSecureChannel => true,
            Error::ServiceFault { status } => *status == StatusCode::BAD_SECURE_CHANNEL_CLOSED,
            _ => false,
        }
    }
}

impl From<ParseSecurityError> for Error {
    fn from(err: ParseSecurityError) -> Self {
        Error::InvalidConfig(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_classification() {
        assert!(Error::Timeout("read".to_string()).is_timeout());
        assert!(
            Error::ServiceFault {
                status: StatusCode::BAD_TIMEOUT
            }
            .is_timeout()
        );
        assert!(!Error::ChannelClosed.is_timeout());
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            Error::AlreadyConnected.to_string(),
            "Connection already established"
        );
        assert_eq!(
            Error::InvalidSecureChannel.to_string(),
            "Invalid secure channel"
        );
        let err = Error::UnexpectedResponse {
            expected: "GetEndpointsResponse",
            actual: "ServiceFault",
        };
        assert_eq!(
            err.to_string(),
            "Unexpected response: expected GetEndpointsResponse, got ServiceFault"
        );
    }
}
