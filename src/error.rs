use std::io;
use thiserror::Error;

use crate::transport::ConnectionId;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Why a WebSocket opening handshake was refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("connection closed before the request was complete")]
    ConnectionClosed,

    #[error("request headers exceed {0} bytes")]
    HeadersTooLarge(usize),

    #[error("malformed request line: {0}")]
    MalformedRequest(String),

    #[error("HTTP version {0}.{1} is older than 1.1")]
    UnsupportedHttpVersion(u32, u32),

    #[error("missing Host header")]
    MissingHost,

    #[error("not a websocket upgrade request")]
    NotAnUpgrade,

    #[error("unsupported websocket version {0:?}")]
    UnsupportedVersion(Option<String>),

    #[error("client does not speak subprotocol {0}")]
    SubprotocolMismatch(String),

    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,

    #[error("invalid Sec-WebSocket-Key {0:?}")]
    InvalidKey(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("handshake rejected: {0}")]
    Handshake(#[from] HandshakeError),

    /// The peer broke the framing rules; the connection has been closed with `code`.
    #[error("protocol violation ({code}): {reason}")]
    Protocol { code: u16, reason: &'static str },

    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("connection closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("failed to open radio: {0}")]
    Open(String),

    #[error("failed to switch to channel {channel}: {reason}")]
    Channel { channel: u8, reason: String },

    #[error("light {0} not responding")]
    NotResponding(u8),

    #[error("radio task is not running")]
    ChannelClosed,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Radio(#[from] RadioError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("task failed: {0}")]
    Task(String),
}

impl From<config::ConfigError> for BridgeError {
    fn from(e: config::ConfigError) -> Self {
        BridgeError::Config(e.to_string())
    }
}
