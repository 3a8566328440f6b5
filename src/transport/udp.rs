//! Many logical connections over one unconnected UDP socket.
//!
//! Peers are identified by (address, port). The first datagram from an
//! unknown peer registers it under a synthetic [`ConnectionId`] and queues
//! the datagram for that connection; [`UdpMultiplexTransport::accept`] hands
//! the id out. Only one task reads the socket at a time. Whoever holds the
//! receive side routes each datagram into the owning connection's queue and
//! wakes the others, so a `recv` for one peer may end up delivering
//! datagrams for every other peer sharing the socket.
//!
//! No acknowledgement or retransmission is layered on top: a datagram is a
//! message, and reliability is whatever UDP provides.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, trace, warn};

use super::{ConnectionId, Result, Transport};
use crate::config::UdpConfig;
use crate::error::TransportError;

/// Synthetic ids start above the default per-process descriptor limit so
/// they are never mistaken for a real socket.
pub const FIRST_SYNTHETIC_ID: u32 = 1024;

/// Raw peer identity: IPv4 or IPv6 address bytes plus port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerKey {
    pub ip: IpAddr,
    pub port: u16,
}

impl PeerKey {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl From<SocketAddr> for PeerKey {
    fn from(addr: SocketAddr) -> Self {
        Self {
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}

struct ConnectionTable {
    by_peer: HashMap<PeerKey, ConnectionId>,
    peers: HashMap<ConnectionId, PeerKey>,
    pending: HashMap<ConnectionId, VecDeque<Bytes>>,
    /// Registered by a datagram but not yet returned from `accept`.
    unaccepted: VecDeque<ConnectionId>,
    next_id: u32,
}

impl ConnectionTable {
    fn new() -> Self {
        Self {
            by_peer: HashMap::new(),
            peers: HashMap::new(),
            pending: HashMap::new(),
            unaccepted: VecDeque::new(),
            next_id: FIRST_SYNTHETIC_ID,
        }
    }

    fn pop(&mut self, id: ConnectionId) -> Option<Bytes> {
        self.pending.get_mut(&id).and_then(VecDeque::pop_front)
    }

    fn remove(&mut self, id: ConnectionId) -> Option<PeerKey> {
        self.pending.remove(&id);
        self.unaccepted.retain(|pending| *pending != id);
        let peer = self.peers.remove(&id)?;
        self.by_peer.remove(&peer);
        Some(peer)
    }
}

pub struct UdpMultiplexTransport {
    socket: UdpSocket,
    settings: UdpConfig,
    table: StdMutex<ConnectionTable>,
    /// Receive buffer. Holding it means owning the read side of the socket.
    receiver: Mutex<Vec<u8>>,
    arrivals: Notify,
}

impl UdpMultiplexTransport {
    fn table(&self) -> std::sync::MutexGuard<'_, ConnectionTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.table().peers.len()
    }

    /// Read one datagram from the socket and file it under its owner.
    async fn receive_and_route(&self, buf: &mut [u8]) -> Result<()> {
        let (len, from) = match self.socket.recv_from(buf).await {
            Ok(received) => received,
            // ICMP errors from an earlier send_to surface here; they say
            // nothing about the peers still talking to us.
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
                ) =>
            {
                debug!(error = %e, "ignoring transient udp receive error");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        self.route(Bytes::copy_from_slice(&buf[..len]), from);
        self.arrivals.notify_waiters();
        Ok(())
    }

    fn route(&self, datagram: Bytes, from: SocketAddr) {
        let peer = PeerKey::from(from);
        let mut table = self.table();

        let id = match table.by_peer.get(&peer) {
            Some(id) => *id,
            None => {
                if table.peers.len() >= self.settings.max_connections {
                    warn!(peer = %from, "connection table full, dropping datagram");
                    return;
                }
                let id = ConnectionId(table.next_id);
                table.next_id = table.next_id.wrapping_add(1).max(FIRST_SYNTHETIC_ID);
                table.by_peer.insert(peer, id);
                table.peers.insert(id, peer);
                table.unaccepted.push_back(id);
                debug!(peer = %from, %id, "new udp peer");
                id
            }
        };

        let limit = self.settings.max_pending_datagrams;
        let queue = table.pending.entry(id).or_default();
        if queue.len() >= limit {
            warn!(%id, "pending queue full, dropping datagram");
            return;
        }
        trace!(%id, len = datagram.len(), "queued datagram");
        queue.push_back(datagram);
    }
}

#[async_trait]
impl Transport for UdpMultiplexTransport {
    type Config = UdpConfig;

    const NAME: &'static str = "udp";

    async fn init(config: &UdpConfig) -> Result<Self> {
        let socket =
            UdpSocket::bind(&config.bind_address)
                .await
                .map_err(|source| TransportError::Bind {
                    addr: config.bind_address.clone(),
                    source,
                })?;
        info!(addr = %socket.local_addr()?, "udp transport listening");

        Ok(Self {
            socket,
            settings: config.clone(),
            table: StdMutex::new(ConnectionTable::new()),
            receiver: Mutex::new(vec![0u8; config.max_datagram_bytes]),
            arrivals: Notify::new(),
        })
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    async fn accept(&self) -> Result<ConnectionId> {
        loop {
            // Created before the check so a notify in between is not lost.
            let notified = self.arrivals.notified();
            if let Some(id) = self.table().unaccepted.pop_front() {
                return Ok(id);
            }

            tokio::select! {
                _ = notified => {}
                mut buf = self.receiver.lock() => {
                    self.receive_and_route(&mut buf).await?;
                }
            }
        }
    }

    async fn connect(&self, id: ConnectionId) -> Result<()> {
        if self.is_open(id) {
            Ok(())
        } else {
            Err(TransportError::UnknownConnection(id))
        }
    }

    async fn recv(&self, id: ConnectionId, max_len: usize) -> Result<Vec<u8>> {
        loop {
            let notified = self.arrivals.notified();
            {
                let mut table = self.table();
                if !table.peers.contains_key(&id) {
                    return Err(TransportError::UnknownConnection(id));
                }
                if let Some(datagram) = table.pop(id) {
                    let len = datagram.len().min(max_len);
                    return Ok(datagram[..len].to_vec());
                }
            }

            tokio::select! {
                _ = notified => {}
                mut buf = self.receiver.lock() => {
                    // The previous holder may have routed ours before releasing.
                    if self.table().pending.get(&id).is_some_and(|q| !q.is_empty()) {
                        continue;
                    }
                    self.receive_and_route(&mut buf).await?;
                }
            }
        }
    }

    async fn send(&self, id: ConnectionId, data: &[u8]) -> Result<()> {
        let peer = self
            .table()
            .peers
            .get(&id)
            .copied()
            .ok_or(TransportError::UnknownConnection(id))?;
        self.socket.send_to(data, peer.socket_addr()).await?;
        Ok(())
    }

    async fn disconnect(&self, id: ConnectionId) {
        if let Some(peer) = self.table().remove(id) {
            debug!(%id, peer = %peer.socket_addr(), "udp connection removed");
        }
    }

    fn is_open(&self, id: ConnectionId) -> bool {
        self.table().peers.contains_key(&id)
    }

    fn peer_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.table().peers.get(&id).map(PeerKey::socket_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn bind_loopback() -> UdpMultiplexTransport {
        let config = UdpConfig {
            bind_address: "127.0.0.1:0".to_string(),
            ..UdpConfig::default()
        };
        UdpMultiplexTransport::init(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_accept_registers_new_peer_and_keeps_first_datagram() {
        let transport = bind_loopback().await;
        let server = transport.local_addr().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"list", server).await.unwrap();

        let id = timeout(Duration::from_secs(2), transport.accept())
            .await
            .unwrap()
            .unwrap();
        assert!(id.0 >= FIRST_SYNTHETIC_ID);
        assert_eq!(transport.peer_addr(id), Some(client.local_addr().unwrap()));
        transport.connect(id).await.unwrap();

        let message = transport.recv(id, 100).await.unwrap();
        assert_eq!(message, b"list");
    }

    #[tokio::test]
    async fn test_send_reaches_registered_peer() {
        let transport = bind_loopback().await;
        let server = transport.local_addr().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"ping", server).await.unwrap();
        let id = transport.accept().await.unwrap();
        transport.send(id, b"pong").await.unwrap();

        let mut buf = [0u8; 16];
        let (len, from) = timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"pong");
        assert_eq!(from, server);
    }

    #[tokio::test]
    async fn test_recv_truncates_to_max_len() {
        let transport = bind_loopback().await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(b"0123456789", transport.local_addr().unwrap())
            .await
            .unwrap();

        let id = transport.accept().await.unwrap();
        assert_eq!(transport.recv(id, 4).await.unwrap(), b"0123");
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let transport = bind_loopback().await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(b"hello", transport.local_addr().unwrap())
            .await
            .unwrap();

        let id = transport.accept().await.unwrap();
        assert!(transport.is_open(id));
        transport.disconnect(id).await;
        transport.disconnect(id).await;
        assert!(!transport.is_open(id));
        assert_eq!(transport.connection_count(), 0);
        assert!(matches!(
            transport.recv(id, 10).await,
            Err(TransportError::UnknownConnection(_))
        ));
        assert!(matches!(
            transport.send(id, b"x").await,
            Err(TransportError::UnknownConnection(_))
        ));
    }

    #[tokio::test]
    async fn test_full_table_drops_new_peers() {
        let config = UdpConfig {
            bind_address: "127.0.0.1:0".to_string(),
            max_connections: 1,
            ..UdpConfig::default()
        };
        let transport = UdpMultiplexTransport::init(&config).await.unwrap();
        let server = transport.local_addr().unwrap();

        let first = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let second = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        first.send_to(b"a", server).await.unwrap();
        let id = transport.accept().await.unwrap();

        second.send_to(b"b", server).await.unwrap();
        first.send_to(b"c", server).await.unwrap();

        assert_eq!(transport.recv(id, 10).await.unwrap(), b"a");
        assert_eq!(transport.recv(id, 10).await.unwrap(), b"c");
        assert_eq!(transport.connection_count(), 1);
    }
}
