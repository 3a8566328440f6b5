//! In-process stand-in for the radio and the lights behind it.
//!
//! Clones share state, so a test can hand one clone to the bridge and keep
//! another to script the lights and inspect what was transmitted.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use light_bridge_protocol::{AddressScheme, Color, Command, Framing, Packet};

use super::driver::{LinkSettings, RadioDriver};
use crate::config::RadioConfig;
use crate::error::RadioError;

/// Oldest entries of the SET_RGB log are dropped past this many.
pub const TRANSMISSION_LOG_CAPACITY: usize = 4096;

/// One simulated endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedLight {
    pub color: Color,
    /// Millidegrees Celsius.
    pub temperature: i16,
    pub uptime_ms: u16,
    pub version: u8,
    /// Acknowledges packets but never answers.
    pub silent: bool,
    /// Whether sends to this light are acknowledged at all.
    pub acks: bool,
    /// Id reported in ping responses, if not its own.
    pub echo_id: Option<u8>,
}

impl Default for SimulatedLight {
    fn default() -> Self {
        Self {
            color: Color::BLACK,
            temperature: 21_500,
            uptime_ms: 0,
            version: 1,
            silent: false,
            acks: true,
            echo_id: None,
        }
    }
}

/// A SET_RGB packet that reached a light.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transmission {
    pub id: u8,
    pub channel: u8,
    pub packet: Packet,
}

#[derive(Clone)]
pub struct SimulatedRadio {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    addresses: AddressScheme,
    framing: Framing,
    settings: Option<LinkSettings>,
    channel: u8,
    target: u64,
    lights: BTreeMap<u8, SimulatedLight>,
    responses: VecDeque<Vec<u8>>,
    transmissions: VecDeque<Transmission>,
    fail_open: bool,
}

impl SimulatedRadio {
    pub fn new(addresses: AddressScheme, framing: Framing) -> Self {
        SimulatedRadio {
            inner: Arc::new(Mutex::new(Inner {
                addresses,
                framing,
                settings: None,
                channel: 0,
                target: 0,
                lights: BTreeMap::new(),
                responses: VecDeque::new(),
                transmissions: VecDeque::new(),
                fail_open: false,
            })),
        }
    }

    /// A radio using the same addressing and framing as `config`.
    pub fn for_config(config: &RadioConfig) -> Self {
        Self::new(config.addresses(), config.framing())
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add (or reset) a responsive light.
    pub fn with_light(self, id: u8) -> Self {
        self.insert_light(id, SimulatedLight::default());
        self
    }

    pub fn insert_light(&self, id: u8, light: SimulatedLight) {
        self.inner().lights.insert(id, light);
    }

    pub fn remove_light(&self, id: u8) {
        self.inner().lights.remove(&id);
    }

    /// Modify a light in place; no-op if it does not exist.
    pub fn update_light(&self, id: u8, f: impl FnOnce(&mut SimulatedLight)) {
        if let Some(light) = self.inner().lights.get_mut(&id) {
            f(light);
        }
    }

    pub fn silence(&self, id: u8) {
        self.update_light(id, |light| light.silent = true);
    }

    /// Make `open` fail, as a missing device would.
    pub fn fail_open(&self) {
        self.inner().fail_open = true;
    }

    pub fn color_of(&self, id: u8) -> Option<Color> {
        self.inner().lights.get(&id).map(|light| light.color)
    }

    pub fn received_colors(&self) -> BTreeMap<u8, Color> {
        self.inner()
            .lights
            .iter()
            .map(|(id, light)| (*id, light.color))
            .collect()
    }

    /// The most recent SET_RGB deliveries, oldest first.
    pub fn transmissions(&self) -> Vec<Transmission> {
        self.inner().transmissions.iter().copied().collect()
    }

    pub fn clear_transmissions(&self) {
        self.inner().transmissions.clear();
    }

    pub fn channel(&self) -> u8 {
        self.inner().channel
    }

    pub fn settings(&self) -> Option<LinkSettings> {
        self.inner().settings
    }

    /// Queue a raw payload as if it had just been received.
    pub fn inject(&self, payload: &[u8]) {
        self.inner().responses.push_back(payload.to_vec());
    }
}

impl Inner {
    fn respond(&mut self, packet: Packet) {
        let wire = self.framing.encode(&packet);
        self.responses.push_back(wire.as_bytes().to_vec());
    }
}

impl RadioDriver for SimulatedRadio {
    fn open(&mut self, settings: &LinkSettings) -> Result<(), RadioError> {
        let mut inner = self.inner();
        if inner.fail_open {
            return Err(RadioError::Open("simulated radio not present".to_string()));
        }
        inner.settings = Some(*settings);
        inner.channel = settings.channel;
        Ok(())
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), RadioError> {
        self.inner().channel = channel;
        Ok(())
    }

    fn set_address(&mut self, address: u64) {
        self.inner().target = address;
    }

    fn send(&mut self, payload: &[u8]) -> bool {
        let mut guard = self.inner();
        let inner = &mut *guard;
        let Some(id) = inner.addresses.endpoint(inner.target) else {
            return false;
        };
        let Ok(packet) = inner.framing.decode(payload) else {
            return false;
        };
        let channel = inner.channel;

        let Some(light) = inner.lights.get_mut(&id) else {
            return false;
        };
        if !light.acks {
            return false;
        }

        let answer = match packet.command() {
            Some(Command::SetRgb) => {
                light.color = Color::from_bytes(packet.data);
                if inner.transmissions.len() == TRANSMISSION_LOG_CAPACITY {
                    inner.transmissions.pop_front();
                }
                inner.transmissions.push_back(Transmission {
                    id,
                    channel,
                    packet,
                });
                return true;
            }
            _ if light.silent => None,
            Some(Command::Ping) => Some(Packet::new(
                Command::PingResponse,
                [light.echo_id.unwrap_or(id), 0, 0],
            )),
            Some(Command::GetTemp) => {
                let [hi, lo] = light.temperature.to_be_bytes();
                Some(Packet::new(Command::TempResponse, [hi, lo, 0]))
            }
            Some(Command::GetUptime) => {
                let [hi, lo] = light.uptime_ms.to_be_bytes();
                Some(Packet::new(Command::UptimeResponse, [hi, lo, 0]))
            }
            Some(Command::GetVersion) => {
                Some(Packet::new(Command::VersionResponse, [light.version, 0, 0]))
            }
            _ => None,
        };

        if let Some(answer) = answer {
            inner.respond(answer);
        }
        true
    }

    fn available(&mut self) -> bool {
        !self.inner().responses.is_empty()
    }

    fn receive(&mut self, buf: &mut [u8]) -> usize {
        match self.inner().responses.pop_front() {
            Some(payload) => {
                let len = payload.len().min(buf.len());
                buf[..len].copy_from_slice(&payload[..len]);
                len
            }
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use light_bridge_protocol::DEFAULT_ADDRESS_PREFIX;

    fn radio() -> SimulatedRadio {
        SimulatedRadio::new(AddressScheme::new(DEFAULT_ADDRESS_PREFIX, 0), Framing::Bare)
            .with_light(5)
    }

    fn send_to(radio: &mut SimulatedRadio, id: u8, packet: Packet) -> bool {
        radio.set_address(AddressScheme::new(DEFAULT_ADDRESS_PREFIX, 0).address(id));
        radio.send(&packet.to_bytes())
    }

    #[test]
    fn test_ping_is_answered_with_own_id() {
        let mut radio = radio();
        assert!(send_to(&mut radio, 5, Packet::request(Command::Ping)));
        assert!(radio.available());

        let mut buf = [0u8; 4];
        assert_eq!(radio.receive(&mut buf), 4);
        assert_eq!(buf, [0x81, 5, 0, 0]);
        assert!(!radio.available());
    }

    #[test]
    fn test_missing_light_is_not_acknowledged() {
        let mut radio = radio();
        assert!(!send_to(&mut radio, 6, Packet::request(Command::Ping)));
        assert!(!radio.available());
    }

    #[test]
    fn test_set_rgb_is_recorded() {
        let mut radio = radio();
        assert!(send_to(&mut radio, 5, Packet::set_rgb(Color::new(1, 2, 3))));
        assert_eq!(radio.color_of(5), Some(Color::new(1, 2, 3)));
        assert_eq!(radio.transmissions().len(), 1);
        assert_eq!(radio.transmissions()[0].id, 5);
        assert!(!radio.available());
    }

    #[test]
    fn test_transmission_log_keeps_latest() {
        let mut radio = radio();
        let total = TRANSMISSION_LOG_CAPACITY + 10;
        for n in 0..total {
            let color = Color::new((n % 256) as u8, (n / 256) as u8, 0);
            assert!(send_to(&mut radio, 5, Packet::set_rgb(color)));
        }

        let log = radio.transmissions();
        assert_eq!(log.len(), TRANSMISSION_LOG_CAPACITY);
        assert_eq!(log[0].packet.data, [10, 0, 0]);
        let last = total - 1;
        assert_eq!(
            log[log.len() - 1].packet.data,
            [(last % 256) as u8, (last / 256) as u8, 0]
        );
    }

    #[test]
    fn test_silent_light_acks_without_answering() {
        let mut radio = radio();
        radio.silence(5);
        assert!(send_to(&mut radio, 5, Packet::request(Command::GetTemp)));
        assert!(!radio.available());
    }
}
