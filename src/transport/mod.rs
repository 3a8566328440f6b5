//! Connection-oriented transports the control server listens on.
//!
//! Both implementations expose the same capability set: accept a peer, run
//! whatever handshake the protocol needs, then exchange whole messages. One
//! `recv` returns exactly one application message, never a fragment and
//! never two glued together.

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::TransportError;

pub mod udp;
pub mod websocket;

pub use udp::UdpMultiplexTransport;
pub use websocket::WebSocketTransport;

pub type Result<T> = std::result::Result<T, TransportError>;

/// Opaque handle for one logical connection on a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[async_trait]
pub trait Transport: Send + Sync + Sized + 'static {
    type Config: Send + Sync;

    /// Short name used in logs.
    const NAME: &'static str;

    /// Bind and start listening. Fails with [`TransportError::Bind`].
    async fn init(config: &Self::Config) -> Result<Self>;

    fn local_addr(&self) -> Result<SocketAddr>;

    /// Wait until a new peer shows up and register it.
    async fn accept(&self) -> Result<ConnectionId>;

    /// Run the opening handshake. Called once per connection, before `recv`/`send`.
    async fn connect(&self, id: ConnectionId) -> Result<()>;

    /// Wait for the next complete message, truncated to `max_len` bytes.
    async fn recv(&self, id: ConnectionId, max_len: usize) -> Result<Vec<u8>>;

    async fn send(&self, id: ConnectionId, data: &[u8]) -> Result<()>;

    /// Release everything held for `id`. Calling it again is a no-op.
    async fn disconnect(&self, id: ConnectionId);

    /// Whether `id` is still in the connection table.
    fn is_open(&self, id: ConnectionId) -> bool;

    fn peer_addr(&self, id: ConnectionId) -> Option<SocketAddr>;
}
