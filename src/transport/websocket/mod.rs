//! WebSocket server transport (RFC 6455, text messages only).
//!
//! Every accepted TCP stream becomes a [`WsSession`] stored under a fresh
//! [`ConnectionId`]. Sessions sit behind their own async lock so one slow
//! client never holds up the others.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ConnectionId, Result, Transport};
use crate::config::WebSocketConfig;
use crate::error::TransportError;

pub mod frame;
pub mod handshake;
pub mod session;

pub use session::{SessionLimits, SessionState, WsSession};

type TcpSession = WsSession<BufReader<OwnedReadHalf>, OwnedWriteHalf>;

struct Connection {
    peer: SocketAddr,
    session: Arc<Mutex<TcpSession>>,
}

pub struct WebSocketTransport {
    listener: TcpListener,
    limits: SessionLimits,
    connections: StdMutex<HashMap<ConnectionId, Connection>>,
    next_id: AtomicU32,
}

impl WebSocketTransport {
    fn connections(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, Connection>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn session(&self, id: ConnectionId) -> Result<Arc<Mutex<TcpSession>>> {
        self.connections()
            .get(&id)
            .map(|c| Arc::clone(&c.session))
            .ok_or(TransportError::UnknownConnection(id))
    }

    pub fn connection_count(&self) -> usize {
        self.connections().len()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    type Config = WebSocketConfig;

    const NAME: &'static str = "websocket";

    async fn init(config: &WebSocketConfig) -> Result<Self> {
        let listener =
            TcpListener::bind(&config.bind_address)
                .await
                .map_err(|source| TransportError::Bind {
                    addr: config.bind_address.clone(),
                    source,
                })?;
        info!(addr = %listener.local_addr()?, subprotocol = %config.subprotocol, "websocket transport listening");

        Ok(Self {
            listener,
            limits: SessionLimits {
                subprotocol: Arc::from(config.subprotocol.as_str()),
                max_header_bytes: config.max_header_bytes,
                max_frame_bytes: config.max_frame_bytes,
                close_timeout: config.close_timeout(),
            },
            connections: StdMutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        })
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    async fn accept(&self) -> Result<ConnectionId> {
        let (stream, peer) = self.listener.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!(%peer, error = %e, "failed to set TCP_NODELAY");
        }

        let (read, write) = stream.into_split();
        let session = WsSession::new(BufReader::new(read), write, self.limits.clone());
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.connections().insert(
            id,
            Connection {
                peer,
                session: Arc::new(Mutex::new(session)),
            },
        );
        debug!(%id, %peer, "tcp connection accepted");
        Ok(id)
    }

    async fn connect(&self, id: ConnectionId) -> Result<()> {
        let session = self.session(id)?;
        let result = session.lock().await.handshake().await;
        if let Err(e) = &result {
            debug!(%id, error = %e, "handshake failed");
            self.connections().remove(&id);
        }
        result
    }

    async fn recv(&self, id: ConnectionId, max_len: usize) -> Result<Vec<u8>> {
        let session = self.session(id)?;
        let mut session = session.lock().await;
        let result = session.recv_message(max_len).await;
        if session.state() == SessionState::Closed {
            drop(session);
            self.connections().remove(&id);
        }
        result
    }

    async fn send(&self, id: ConnectionId, data: &[u8]) -> Result<()> {
        let session = self.session(id)?;
        let result = session.lock().await.send_text(data).await;
        result
    }

    async fn disconnect(&self, id: ConnectionId) {
        let removed = self.connections().remove(&id);
        let Some(connection) = removed else {
            return;
        };
        connection.session.lock().await.close().await;
        debug!(%id, peer = %connection.peer, "websocket connection closed");
    }

    fn is_open(&self, id: ConnectionId) -> bool {
        self.connections().contains_key(&id)
    }

    fn peer_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.connections().get(&id).map(|c| c.peer)
    }
}
