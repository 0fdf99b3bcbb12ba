#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// The server closed the connection, or the stream ended
    ConnectionClosed,
    /// Connect attempt did not complete within the configured timeout
    Timeout,
    /// Endpoint is not a usable `ws://` or `wss://` address
    InvalidEndpoint(String),
    /// Reconnection budget for the channel has been spent
    ReconnectExhausted {
        /// Number of reconnect attempts made since the last successful open
        attempts: u32,
    },
    /// Status event stream lagged and missed transitions
    Lagged {
        /// Number of transitions that were missed
        count: u64,
    },
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::Timeout => write!(f, "WebSocket connect timed out"),
            Self::InvalidEndpoint(endpoint) => write!(f, "Invalid WebSocket endpoint: {endpoint}"),
            Self::ReconnectExhausted { attempts } => {
                write!(f, "Reconnect attempts exhausted after {attempts} tries")
            }
            Self::Lagged { count } => write!(f, "Status stream lagged, missed {count} transitions"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        let kind = match e {
            WsError::InvalidEndpoint(_) => crate::error::Kind::Validation,
            _ => crate::error::Kind::WebSocket,
        };
        crate::error::Error::with_source(kind, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, WsError::Connection(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Kind};

    #[test]
    fn exhausted_display_mentions_attempts() {
        let error = WsError::ReconnectExhausted { attempts: 5 };

        assert_eq!(
            error.to_string(),
            "Reconnect attempts exhausted after 5 tries"
        );
    }

    #[test]
    fn invalid_endpoint_maps_to_validation_kind() {
        let error: Error = WsError::InvalidEndpoint("http://example.com".to_owned()).into();

        assert_eq!(error.kind(), Kind::Validation);
        assert!(error.downcast_ref::<WsError>().is_some(), "source should be WsError");
    }

    #[test]
    fn closed_maps_to_websocket_kind() {
        let error: Error = WsError::ConnectionClosed.into();

        assert_eq!(error.kind(), Kind::WebSocket);
    }
}
