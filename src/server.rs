//! Control server: one task per client connection, turning text commands
//! into shared-state writes and radio requests.

use std::sync::Arc;
use std::time::Duration;

use light_bridge_protocol::Color;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::command::{
    invalid_arguments_for, ControlCommand, REPLY_INVALID_ARGUMENTS, REPLY_NOT_RESPONDING,
    REPLY_OK,
};
use crate::config::RadioConfig;
use crate::error::RadioError;
use crate::radio::RadioHandle;
use crate::shutdown::Shutdown;
use crate::state::SharedState;
use crate::transport::{ConnectionId, Transport};

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Executes control commands. Cheap to clone; one copy per connection.
#[derive(Clone)]
pub struct CommandHandler {
    state: Arc<SharedState>,
    radio: RadioHandle,
    controller_id: u8,
    multicast_id: Option<u8>,
}

impl CommandHandler {
    pub fn new(state: Arc<SharedState>, radio: RadioHandle, config: &RadioConfig) -> Self {
        Self {
            state,
            radio,
            controller_id: config.controller_id,
            multicast_id: config.multicast_id,
        }
    }

    fn is_light(&self, id: u8) -> bool {
        id != self.controller_id && Some(id) != self.multicast_id
    }

    fn light_ids(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=u8::MAX).filter(move |id| self.is_light(*id))
    }

    /// Handle one message and return the reply, if it gets one.
    pub async fn process(&self, message: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(message);
        let command = match ControlCommand::parse(&text) {
            Ok(command) => command,
            Err(e) => return Some(e.reply().to_string()),
        };
        debug!(?command, "control command");

        let reply = match command {
            ControlCommand::SetRgb { id, color } => self.set_rgb(id, color).await,
            ControlCommand::List => self.state.connected_ids().await.to_list_reply(),
            ControlCommand::Discover => {
                match self.radio.discover().await {
                    Ok(found) => info!(connected = found.len(), "rescan requested by client"),
                    Err(e) => error!(error = %e, "rescan failed"),
                }
                REPLY_OK.to_string()
            }
            ControlCommand::Temperature(id) => self.query(id, self.radio.temperature(id)).await,
            ControlCommand::Uptime(id) => self.query(id, self.radio.uptime(id)).await,
            ControlCommand::Version(id) => self.query(id, self.radio.version(id)).await,
            ControlCommand::Ping(echo) => echo,
            ControlCommand::Frame { colors, invalid_id } => {
                // Entry n is light n; reserved ids in range are left alone.
                let entries = (1..=u8::MAX)
                    .zip(colors)
                    .filter(|(id, _)| self.is_light(*id));
                self.state.set_colors_each(entries).await;
                return invalid_id.map(invalid_arguments_for);
            }
        };
        Some(reply)
    }

    async fn set_rgb(&self, id: u8, color: Color) -> String {
        if id == self.controller_id {
            return REPLY_INVALID_ARGUMENTS.to_string();
        }
        if Some(id) == self.multicast_id {
            self.state.set_colors(self.light_ids(), color).await;
            return REPLY_OK.to_string();
        }

        self.state.set_color(id, color).await;
        if self.state.is_connected(id).await {
            REPLY_OK.to_string()
        } else {
            REPLY_NOT_RESPONDING.to_string()
        }
    }

    async fn query<T, F>(&self, id: u8, request: F) -> String
    where
        T: ToString,
        F: std::future::Future<Output = Result<T, RadioError>>,
    {
        if !self.is_light(id) {
            return REPLY_INVALID_ARGUMENTS.to_string();
        }
        match request.await {
            Ok(value) => value.to_string(),
            Err(RadioError::NotResponding(_)) => REPLY_NOT_RESPONDING.to_string(),
            Err(e) => {
                error!(id, error = %e, "radio query failed");
                REPLY_NOT_RESPONDING.to_string()
            }
        }
    }
}

/// Accept loop for one transport.
pub struct ControlServer<T: Transport> {
    transport: Arc<T>,
    handler: CommandHandler,
    max_message_bytes: usize,
    idle_timeout: Option<Duration>,
}

impl<T: Transport> ControlServer<T> {
    pub fn new(transport: T, handler: CommandHandler, max_message_bytes: usize) -> Self {
        Self {
            transport: Arc::new(transport),
            handler,
            max_message_bytes,
            idle_timeout: None,
        }
    }

    /// Drop clients that send nothing for `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Accept connections until shutdown, then wait for every handler to finish.
    pub async fn run(self: Arc<Self>, mut shutdown: Shutdown) {
        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.triggered() => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(id) => {
                        let server = Arc::clone(&self);
                        let shutdown = shutdown.clone();
                        handlers.spawn(async move { server.handle_connection(id, shutdown).await });
                    }
                    Err(e) => {
                        warn!(transport = T::NAME, error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(finished) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = finished {
                        error!(transport = T::NAME, error = %e, "connection handler panicked");
                    }
                }
            }
        }

        while handlers.join_next().await.is_some() {}
        info!(transport = T::NAME, "control server stopped");
    }

    /// Serve one client until it leaves or shutdown is requested.
    pub async fn handle_connection(&self, id: ConnectionId, mut shutdown: Shutdown) {
        let transport = &self.transport;
        let peer = transport.peer_addr(id);

        if let Err(e) = transport.connect(id).await {
            debug!(transport = T::NAME, %id, ?peer, error = %e, "connection rejected");
            transport.disconnect(id).await;
            return;
        }
        info!(transport = T::NAME, %id, ?peer, "client connected");

        while transport.is_open(id) {
            let message = tokio::select! {
                _ = shutdown.triggered() => break,
                _ = idle(self.idle_timeout) => {
                    info!(transport = T::NAME, %id, "client idle, dropping");
                    break;
                }
                received = transport.recv(id, self.max_message_bytes) => match received {
                    Ok(message) => message,
                    Err(e) => {
                        debug!(transport = T::NAME, %id, error = %e, "receive ended");
                        break;
                    }
                },
            };

            if let Some(reply) = self.handler.process(&message).await {
                if let Err(e) = transport.send(id, reply.as_bytes()).await {
                    debug!(transport = T::NAME, %id, error = %e, "send failed");
                    break;
                }
            }
        }

        transport.disconnect(id).await;
        info!(transport = T::NAME, %id, "client disconnected");
    }
}

async fn idle(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}
