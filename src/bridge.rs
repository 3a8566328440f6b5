use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::radio::{RadioDriver, RadioHandle, RadioLink};
use crate::server::{CommandHandler, ControlServer};
use crate::shutdown::{self, ShutdownTrigger};
use crate::state::SharedState;
use crate::transport::{Transport, UdpMultiplexTransport, WebSocketTransport};

/// The running bridge: radio loop plus one control server per enabled transport.
pub struct LightBridge {
    state: Arc<SharedState>,
    radio: RadioHandle,
    websocket_addr: Option<SocketAddr>,
    udp_addr: Option<SocketAddr>,
    trigger: ShutdownTrigger,
    tasks: Vec<JoinHandle<()>>,
}

impl LightBridge {
    /// Open the radio, bind every enabled transport, then start all loops.
    /// Nothing is spawned unless all of that succeeded.
    pub async fn start<D: RadioDriver>(config: BridgeConfig, driver: D) -> Result<Self> {
        config.validate()?;

        let state = Arc::new(SharedState::new());
        let (link, radio) = RadioLink::open(driver, Arc::clone(&state), &config.radio)?;
        let handler = CommandHandler::new(Arc::clone(&state), radio.clone(), &config.radio);

        let websocket = if config.websocket.enabled {
            Some(WebSocketTransport::init(&config.websocket).await?)
        } else {
            None
        };
        let udp = if config.udp.enabled {
            Some(UdpMultiplexTransport::init(&config.udp).await?)
        } else {
            None
        };

        let (trigger, shutdown) = shutdown::channel();
        let mut tasks = vec![tokio::spawn(link.run(shutdown.clone()))];

        let mut websocket_addr = None;
        if let Some(transport) = websocket {
            websocket_addr = Some(transport.local_addr()?);
            let server = Arc::new(ControlServer::new(
                transport,
                handler.clone(),
                config.websocket.max_message_bytes,
            ));
            tasks.push(tokio::spawn(server.run(shutdown.clone())));
        }

        let mut udp_addr = None;
        if let Some(transport) = udp {
            udp_addr = Some(transport.local_addr()?);
            let server = Arc::new(
                ControlServer::new(transport, handler, config.udp.max_datagram_bytes)
                    .with_idle_timeout(config.udp.idle_timeout()),
            );
            tasks.push(tokio::spawn(server.run(shutdown)));
        }

        info!(?websocket_addr, ?udp_addr, "light bridge started");
        Ok(Self {
            state,
            radio,
            websocket_addr,
            udp_addr,
            trigger,
            tasks,
        })
    }

    pub fn handle(&self) -> RadioHandle {
        self.radio.clone()
    }

    pub fn state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    pub fn websocket_addr(&self) -> Option<SocketAddr> {
        self.websocket_addr
    }

    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp_addr
    }

    /// Signal every loop to stop and wait for them.
    pub async fn shutdown(self) -> Result<()> {
        info!("shutting down light bridge");
        self.trigger.trigger();
        for result in futures::future::join_all(self.tasks).await {
            result.map_err(|e| BridgeError::Task(e.to_string()))?;
        }
        info!("light bridge stopped");
        Ok(())
    }
}
