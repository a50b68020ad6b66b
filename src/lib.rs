#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod error;
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

pub use crate::ws::WsError;
pub use crate::ws::classify::{Category, Classified, Environment, classify};
pub use crate::ws::config::{Config, ReconnectConfig};
pub use crate::ws::connection::{ConnectionManager, ConnectionState, ConnectionStatus};
pub use crate::ws::events::{Event, EventKind, Payload, SubscriptionHandle};
pub use crate::ws::transport::{
    AlwaysOnline, Failure, Platform, ReadyState, Transport, TransportEvent, TransportSink,
    TransportStream, WsTransport,
};
