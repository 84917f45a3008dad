//! Link error types
//!
//! Every abnormal condition on the dashboard link is returned to the owner;
//! nothing here is retried or swallowed.

use thiserror::Error;

use super::connection::ConnectionState;
use super::messages::DecodeError;
use super::registry::RegistryError;

/// Errors that can occur on the dashboard link
#[derive(Error, Debug)]
pub enum LinkError {
    /// The page URL is neither `http` nor `https`
    #[error("Unsupported scheme '{scheme}': only http and https are supported")]
    UnsupportedScheme { scheme: String },

    /// The page URL has no host to connect to
    #[error("Invalid page URL: {0}")]
    InvalidPageUrl(String),

    /// The derived endpoint could not be parsed
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    /// The transport could not be opened
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The transport closed after it was open
    #[error("Connection closed prematurely{}", reason_suffix(.reason))]
    ConnectionClosed { reason: Option<String> },

    /// Inbound frame was not a valid update
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Inbound update had nobody to deliver it to
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] RegistryError),

    /// Send attempted while the connection is not open
    #[error("Connection is not open (state: {state})")]
    NotOpen { state: ConnectionState },

    /// Outbound command could not be serialized
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Read or write on the transport failed
    #[error("Transport error: {0}")]
    Transport(String),
}

impl LinkError {
    pub(crate) fn closed(reason: impl Into<String>) -> Self {
        LinkError::ConnectionClosed {
            reason: Some(reason.into()),
        }
    }
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!(": {}", reason),
        None => String::new(),
    }
}

/// Result type alias for link operations
pub type LinkResult<T> = Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::topic::TopicKind;

    #[test]
    fn test_error_display() {
        let err = LinkError::UnsupportedScheme {
            scheme: "file".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unsupported scheme 'file': only http and https are supported"
        );

        let err = LinkError::ConnectionClosed { reason: None };
        assert_eq!(err.to_string(), "Connection closed prematurely");

        let err = LinkError::closed("reset by peer");
        assert_eq!(err.to_string(), "Connection closed prematurely: reset by peer");

        let err = LinkError::NotOpen {
            state: ConnectionState::Closed,
        };
        assert_eq!(err.to_string(), "Connection is not open (state: Closed)");
    }

    #[test]
    fn test_registry_error_conversion() {
        let err: LinkError = RegistryError::MissingHandler {
            key: TopicKind::FixtureState,
        }
        .into();
        assert!(matches!(err, LinkError::Dispatch(_)));
        assert_eq!(
            err.to_string(),
            "Dispatch error: No handler registered for topic dmx"
        );
    }
}
