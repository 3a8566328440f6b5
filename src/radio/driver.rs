use light_bridge_protocol::{AddressScheme, Framing};

use crate::config::RadioConfig;
use crate::error::RadioError;

/// Parameters the physical layer is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    pub channel: u8,
    /// Fixed payload size; every send and receive is exactly this long.
    pub payload_size: usize,
    /// Address the base station listens on for responses.
    pub listen_address: u64,
}

impl LinkSettings {
    pub fn from_config(config: &RadioConfig) -> Self {
        let addresses: AddressScheme = config.addresses();
        let framing: Framing = config.framing();
        Self {
            channel: config.channel,
            payload_size: framing.wire_size(),
            listen_address: addresses.address(config.controller_id),
        }
    }
}

/// The packet radio, reduced to what the bridge needs from it.
///
/// Calls are synchronous and expected to return quickly; waiting for a
/// response is done by the caller polling [`RadioDriver::available`].
pub trait RadioDriver: Send + 'static {
    fn open(&mut self, settings: &LinkSettings) -> Result<(), RadioError>;

    fn set_channel(&mut self, channel: u8) -> Result<(), RadioError>;

    /// Select the endpoint subsequent sends go to.
    fn set_address(&mut self, address: u64);

    /// Transmit one payload. Returns whether the hardware saw an acknowledgement.
    fn send(&mut self, payload: &[u8]) -> bool;

    /// Whether a received payload is waiting.
    fn available(&mut self) -> bool;

    /// Copy the oldest waiting payload into `buf` and return its length.
    fn receive(&mut self, buf: &mut [u8]) -> usize;
}
