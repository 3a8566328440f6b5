//! Bridge configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables prefixed with `LIGHT_BRIDGE` (nested keys separated
//! by `__`, e.g. `LIGHT_BRIDGE__RADIO__MAX_FPS=60`).

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use light_bridge_protocol::{
    AddressScheme, Framing, CONTROLLER_ID, DEFAULT_ADDRESS_PREFIX, DEFAULT_CHANNEL, MAX_CHANNEL,
    MULTICAST_ID,
};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

pub const ENV_PREFIX: &str = "LIGHT_BRIDGE";

/// Subprotocol every WebSocket client must request: Networked Lights Control Protocol.
pub const DEFAULT_SUBPROTOCOL: &str = "nlcp";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub websocket: WebSocketConfig,
    pub udp: UdpConfig,
    pub radio: RadioConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub subprotocol: String,
    /// Upper bound on the opening request, request line included.
    pub max_header_bytes: usize,
    /// Messages longer than this are truncated before they reach the command parser.
    pub max_message_bytes: usize,
    /// Frames announcing a larger payload are refused with close code 1009.
    pub max_frame_bytes: u64,
    /// How long `disconnect` waits for the peer to echo the close frame.
    pub close_timeout_ms: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:7446".to_string(),
            subprotocol: DEFAULT_SUBPROTOCOL.to_string(),
            max_header_bytes: 8192,
            max_message_bytes: 2000,
            max_frame_bytes: 1024 * 1024,
            close_timeout_ms: 1000,
        }
    }
}

impl WebSocketConfig {
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UdpConfig {
    pub enabled: bool,
    pub bind_address: String,
    /// Datagrams from new peers are dropped once this many connections exist.
    pub max_connections: usize,
    /// Per-connection backlog of datagrams nobody has read yet.
    pub max_pending_datagrams: usize,
    pub max_datagram_bytes: usize,
    /// Peers silent for this long are dropped from the connection table.
    pub idle_timeout_secs: Option<u64>,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:7447".to_string(),
            max_connections: 64,
            max_pending_datagrams: 256,
            max_datagram_bytes: 2000,
            idle_timeout_secs: Some(300),
        }
    }
}

impl UdpConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Id of the base station itself; never assigned to a light.
    pub controller_id: u8,
    /// Id every light listens to; skipped by discovery.
    pub multicast_id: Option<u8>,
    pub channel: u8,
    pub address_prefix: u32,
    /// Byte XORed into the endpoint id when deriving its address. 0 = identity.
    pub address_xor: u8,
    /// 2-byte header prepended to every packet, if the firmware expects one.
    pub framing_header: Option<u16>,
    /// Ping responses carry the responder's id in `data[0]`.
    pub ping_echoes_id: bool,
    pub response_timeout_ms: u64,
    pub poll_interval_us: u64,
    pub max_fps: u32,
    /// Periodic rediscovery. `None` scans only at startup and on request.
    pub rescan_interval_secs: Option<u64>,
    pub hopping: Option<HoppingConfig>,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            controller_id: CONTROLLER_ID,
            multicast_id: Some(MULTICAST_ID),
            channel: DEFAULT_CHANNEL,
            address_prefix: DEFAULT_ADDRESS_PREFIX,
            address_xor: 0,
            framing_header: None,
            ping_echoes_id: true,
            response_timeout_ms: 10,
            poll_interval_us: 200,
            max_fps: 30,
            rescan_interval_secs: None,
            hopping: None,
        }
    }
}

impl RadioConfig {
    pub fn addresses(&self) -> AddressScheme {
        AddressScheme::new(self.address_prefix, self.address_xor)
    }

    pub fn framing(&self) -> Framing {
        Framing::from_header(self.framing_header)
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_secs(1) / self.max_fps.max(1)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn rescan_interval(&self) -> Option<Duration> {
        self.rescan_interval_secs.map(Duration::from_secs)
    }

    /// True for ids that may belong to a light (not the controller, not multicast).
    pub fn is_light_id(&self, id: u8) -> bool {
        id != self.controller_id && Some(id) != self.multicast_id
    }

    /// Every id a light can have, in ascending order.
    pub fn light_ids(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=u8::MAX).filter(move |id| self.is_light_id(*id))
    }
}

/// Frequency hopping: the active channel is `channels[(unix_ms / dwell_ms) % len]`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HoppingConfig {
    pub dwell_ms: u64,
    pub channels: Vec<u8>,
}

impl BridgeConfig {
    /// Load defaults, then `path` (if any), then `LIGHT_BRIDGE__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: BridgeConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.websocket.enabled && !self.udp.enabled {
            return Err(invalid("at least one transport must be enabled"));
        }
        if self.websocket.enabled {
            parse_bind_address("websocket.bind_address", &self.websocket.bind_address)?;
            if self.websocket.subprotocol.is_empty() {
                return Err(invalid("websocket.subprotocol must not be empty"));
            }
            if self.websocket.max_message_bytes == 0 {
                return Err(invalid("websocket.max_message_bytes must be positive"));
            }
        }
        if self.udp.enabled {
            parse_bind_address("udp.bind_address", &self.udp.bind_address)?;
            if self.udp.max_connections == 0 || self.udp.max_datagram_bytes == 0 {
                return Err(invalid(
                    "udp.max_connections and udp.max_datagram_bytes must be positive",
                ));
            }
            if self.udp.idle_timeout_secs == Some(0) {
                return Err(invalid("udp.idle_timeout_secs must be positive when set"));
            }
        }

        let radio = &self.radio;
        if radio.max_fps == 0 || radio.max_fps > 1000 {
            return Err(invalid("radio.max_fps must be between 1 and 1000"));
        }
        if Some(radio.controller_id) == radio.multicast_id {
            return Err(invalid("radio.controller_id and radio.multicast_id must differ"));
        }
        if radio.channel > MAX_CHANNEL {
            return Err(BridgeError::Config(format!(
                "radio.channel {} is above {}",
                radio.channel, MAX_CHANNEL
            )));
        }
        if radio.response_timeout_ms == 0 {
            return Err(invalid("radio.response_timeout_ms must be positive"));
        }
        if let Some(hopping) = &radio.hopping {
            if hopping.dwell_ms == 0 {
                return Err(invalid("radio.hopping.dwell_ms must be positive"));
            }
            if hopping.channels.is_empty() {
                return Err(invalid("radio.hopping.channels must not be empty"));
            }
            if let Some(channel) = hopping.channels.iter().find(|c| **c > MAX_CHANNEL) {
                return Err(BridgeError::Config(format!(
                    "radio.hopping channel {} is above {}",
                    channel, MAX_CHANNEL
                )));
            }
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> BridgeError {
    BridgeError::Config(reason.to_string())
}

fn parse_bind_address(key: &str, value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .map_err(|e| BridgeError::Config(format!("{} {:?}: {}", key, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.websocket.bind_address, "0.0.0.0:7446");
        assert_eq!(config.websocket.subprotocol, "nlcp");
        assert_eq!(config.udp.bind_address, "0.0.0.0:7447");
        assert_eq!(config.radio.max_fps, 30);
        assert_eq!(config.radio.multicast_id, Some(255));
        assert_eq!(config.radio.framing(), Framing::Bare);
        assert_eq!(config.radio.frame_period(), Duration::from_nanos(33_333_333));
        config.validate().unwrap();
    }

    #[test]
    fn test_light_ids_skip_reserved() {
        let radio = RadioConfig::default();
        let ids: Vec<u8> = radio.light_ids().collect();
        assert_eq!(ids.len(), 254);
        assert_eq!(ids.first(), Some(&1));
        assert_eq!(ids.last(), Some(&254));
        assert!(!radio.is_light_id(0));
        assert!(!radio.is_light_id(255));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[websocket]
bind_address = "127.0.0.1:9000"

[udp]
enabled = false

[radio]
max_fps = 60
address_xor = 73
framing_header = 7446

[radio.hopping]
dwell_ms = 250
channels = [10, 40, 70]
"#
        )
        .unwrap();

        let config = BridgeConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.websocket.bind_address, "127.0.0.1:9000");
        assert_eq!(config.websocket.subprotocol, "nlcp");
        assert!(!config.udp.enabled);
        assert_eq!(config.radio.max_fps, 60);
        assert_eq!(config.radio.addresses().address(0) & 0xFF, 73);
        assert_eq!(config.radio.framing(), Framing::Header(7446));
        assert_eq!(
            config.radio.hopping,
            Some(HoppingConfig {
                dwell_ms: 250,
                channels: vec![10, 40, 70]
            })
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = BridgeConfig::default();
        config.radio.max_fps = 0;
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));

        let mut config = BridgeConfig::default();
        config.radio.multicast_id = Some(0);
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.radio.hopping = Some(HoppingConfig {
            dwell_ms: 100,
            channels: vec![],
        });
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.udp.bind_address = "not an address".to_string();
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.udp.idle_timeout_secs = Some(0);
        assert!(config.validate().is_err());
    }
}
