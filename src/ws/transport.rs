#![expect(
    clippy::module_name_repetitions,
    reason = "Transport types expose their domain in the name for clarity"
)]

//! Transport and platform capability traits.
//!
//! The connection manager never touches a socket API or an environment global
//! directly; it consumes the capability traits in this module. [`WsTransport`]
//! is the production implementation backed by `tokio-tungstenite`; tests drive
//! the same state machine through fakes.

use std::fmt;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code for a clean client-initiated shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Transport lifecycle phase, mirroring the remote socket's ready state.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Establishment in progress
    Connecting,
    /// Frames can be sent and received
    Open,
    /// A close has been initiated but not completed
    Closing,
    /// No usable connection
    Closed,
}

/// Raw transport failure, prior to classification.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The connection could not be established
    Refused(String),
    /// The remote closed the connection
    Closed {
        /// Close code from the close frame, when one was sent
        code: Option<u16>,
        /// Close reason text, possibly empty
        reason: String,
    },
    /// The establishment deadline elapsed
    Timeout,
    /// No pong arrived within the heartbeat grace period
    HeartbeatExpired,
    /// A protocol or I/O error on an established connection
    Protocol(String),
    /// The environment cannot support the requested connection
    Unsupported(String),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refused(detail) => write!(f, "connection refused: {detail}"),
            Self::Closed { code, reason } => match code {
                Some(code) => write!(f, "connection closed ({code}): {reason}"),
                None => write!(f, "connection closed: {reason}"),
            },
            Self::Timeout => write!(f, "connection attempt timed out"),
            Self::HeartbeatExpired => write!(f, "heartbeat expired without a pong"),
            Self::Protocol(detail) => write!(f, "transport error: {detail}"),
            Self::Unsupported(detail) => write!(f, "transport unsupported: {detail}"),
        }
    }
}

/// Event delivered by the read half of an established connection.
#[non_exhaustive]
#[derive(Debug)]
pub enum TransportEvent {
    /// A complete text frame
    Text(String),
    /// The remote closed the connection
    Closed {
        /// Close code from the close frame, when one was sent
        code: Option<u16>,
        /// Close reason text, possibly empty
        reason: String,
    },
    /// The transport failed
    Failed(Failure),
}

/// Write half of an established connection.
#[async_trait]
pub trait TransportSink: Send {
    /// Send a text frame.
    async fn send(&mut self, text: String) -> Result<(), Failure>;

    /// Close the connection with the given code and reason. Best effort; the
    /// peer may already be gone.
    async fn close(&mut self, code: u16, reason: &str);
}

/// Read half of an established connection.
#[async_trait]
pub trait TransportStream: Send {
    /// The next inbound event, or `None` once the stream is exhausted.
    async fn next_event(&mut self) -> Option<TransportEvent>;
}

/// Capability to open connections.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish a connection to `url` and return its write and read halves.
    async fn connect(
        &self,
        url: &Url,
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportStream>), Failure>;
}

/// Environment-level signals the connection manager depends on.
#[async_trait]
pub trait Platform: Send + Sync + 'static {
    /// Whether the network is currently reachable.
    fn is_online(&self) -> bool;

    /// Resolve once the network becomes reachable. The default resolves
    /// immediately, for environments without a reachability signal.
    async fn wait_online(&self) {}
}

/// Platform for environments without a reachability signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl Platform for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Production transport backed by `tokio-tungstenite`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(
        &self,
        url: &Url,
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportStream>), Failure> {
        use tokio_tungstenite::tungstenite::Error as TungsteniteError;

        let (ws_stream, _) = connect_async(url.as_str()).await.map_err(|e| match e {
            TungsteniteError::Tls(tls) => Failure::Unsupported(tls.to_string()),
            TungsteniteError::Url(detail) => Failure::Unsupported(detail.to_string()),
            other => Failure::Refused(other.to_string()),
        })?;
        let (write, read) = ws_stream.split();

        Ok((Box::new(WsSink { write }), Box::new(WsEvents { read })))
    }
}

struct WsSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl TransportSink for WsSink {
    async fn send(&mut self, text: String) -> Result<(), Failure> {
        self.write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| Failure::Protocol(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        drop(self.write.send(Message::Close(Some(frame))).await);
    }
}

struct WsEvents {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl TransportStream for WsEvents {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => return Some(TransportEvent::Text(text.to_string())),
                Ok(Message::Close(frame)) => {
                    let (code, reason) = frame.map_or((None, String::new()), |f| {
                        (Some(u16::from(f.code)), f.reason.to_string())
                    });
                    return Some(TransportEvent::Closed { code, reason });
                }
                Ok(_) => {
                    // Ignore binary frames and transport-level ping/pong.
                }
                Err(e) => {
                    return Some(TransportEvent::Failed(Failure::Protocol(e.to_string())));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_display_includes_close_code() {
        let failure = Failure::Closed {
            code: Some(1008),
            reason: "policy violation".to_owned(),
        };

        assert_eq!(
            failure.to_string(),
            "connection closed (1008): policy violation"
        );
    }

    #[test]
    fn failure_display_without_close_code() {
        let failure = Failure::Closed {
            code: None,
            reason: String::new(),
        };

        assert_eq!(failure.to_string(), "connection closed: ");
    }
}
