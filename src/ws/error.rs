#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

use super::classify::Classified;

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// A connection attempt resolved with a classified transport failure
    Attempt(Classified),
    /// The endpoint scheme is not `ws` or `wss`
    UnsupportedScheme(String),
    /// A different endpoint is already connected
    AlreadyConnected {
        /// The endpoint currently held open
        current: String,
    },
    /// The manager was destroyed by an explicit disconnect
    Destroyed,
    /// The connection closed before the operation completed
    ConnectionClosed,
    /// Timed out waiting for an in-flight connection attempt to resolve
    JoinTimeout,
    /// Reconnect attempts were exhausted
    Exhausted {
        /// How many retries were attempted
        attempts: u32,
    },
    /// Event stream lagged and missed events
    Lagged {
        /// Number of events that were missed
        count: u64,
    },
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attempt(classified) => write!(
                f,
                "connection attempt failed ({}): {}",
                classified.category, classified.message
            ),
            Self::UnsupportedScheme(scheme) => {
                write!(f, "unsupported endpoint scheme {scheme:?}, expected ws or wss")
            }
            Self::AlreadyConnected { current } => {
                write!(f, "already connected to {current}")
            }
            Self::Destroyed => write!(f, "connection manager was destroyed by disconnect"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::JoinTimeout => {
                write!(f, "timed out waiting for the in-flight connection attempt")
            }
            Self::Exhausted { attempts } => {
                write!(f, "reconnect attempts exhausted after {attempts} tries")
            }
            Self::Lagged { count } => write!(f, "event stream lagged, missed {count} events"),
        }
    }
}

impl StdError for WsError {}

// Integration with the main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::classify::Category;

    #[test]
    fn attempt_display_carries_classification() {
        let error = WsError::Attempt(Classified {
            category: Category::Auth,
            message: "authentication rejected by the remote endpoint".to_owned(),
            retryable: false,
        });

        assert_eq!(
            error.to_string(),
            "connection attempt failed (auth): authentication rejected by the remote endpoint"
        );
    }

    #[test]
    fn into_crate_error_keeps_kind() {
        let error: crate::error::Error = WsError::Destroyed.into();

        assert_eq!(error.kind(), crate::error::Kind::WebSocket);
        assert!(error.downcast_ref::<WsError>().is_some(), "source must survive");
    }
}
