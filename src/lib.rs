//! # light-bridge
//!
//! Drives a fleet of radio-controlled RGB lights from network clients.
//!
//! Clients speak a small text protocol (`setrgb 5 255 0 0`, `list`, ...)
//! over either a WebSocket (subprotocol `nlcp`, port 7446) or plain UDP
//! datagrams (port 7447). Commands land in a [`SharedState`] color table;
//! the radio loop republishes that table to every light that answered the
//! last discovery sweep, capped at a fixed frame rate.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use light_bridge::{BridgeConfig, LightBridge, SimulatedRadio};
//!
//! #[tokio::main]
//! async fn main() -> light_bridge::Result<()> {
//!     let config = BridgeConfig::load(None)?;
//!     let radio = SimulatedRadio::for_config(&config.radio).with_light(1);
//!     let bridge = LightBridge::start(config, radio).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     bridge.shutdown().await
//! }
//! ```

pub mod bridge;
pub mod command;
pub mod config;
pub mod error;
pub mod radio;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod transport;

pub use bridge::LightBridge;
pub use command::ControlCommand;
pub use config::{BridgeConfig, HoppingConfig, RadioConfig, UdpConfig, WebSocketConfig};
pub use error::{BridgeError, HandshakeError, RadioError, Result, TransportError};
pub use radio::{RadioDriver, RadioHandle, RadioLink, SimulatedRadio};
pub use server::{CommandHandler, ControlServer};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use state::{ConnectedSet, SharedState};
pub use transport::{ConnectionId, Transport, UdpMultiplexTransport, WebSocketTransport};

pub use light_bridge_protocol::{Color, Command, Packet};
