#![no_std]
//! Radio wire format shared by the base station and the light firmware.
//!
//! Every packet is one command byte followed by three data bytes. Some
//! deployments prefix a fixed 2-byte header as a framing sanity check; see
//! [`Framing`].

use core::fmt;
use serde::{Deserialize, Serialize};

/// Command byte plus three data bytes.
pub const PACKET_SIZE: usize = 4;
pub const HEADER_SIZE: usize = 2;
pub const MAX_WIRE_SIZE: usize = PACKET_SIZE + HEADER_SIZE;

/// Number of addressable ids, including the reserved ones.
pub const NUM_IDS: usize = 256;

pub const CONTROLLER_ID: u8 = 0x00;
pub const MULTICAST_ID: u8 = 0xFF;

/// Upper 32 bits of every 40-bit transceiver address ("SIGM").
pub const DEFAULT_ADDRESS_PREFIX: u32 = 0x5349_474D;
/// 2.4 GHz + channel MHz.
pub const DEFAULT_CHANNEL: u8 = 80;
pub const MAX_CHANNEL: u8 = 125;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    SetRgb = 0x10,
    Ping = 0x80,
    PingResponse = 0x81,
    GetTemp = 0x90,
    TempResponse = 0x91,
    GetUptime = 0x92,
    UptimeResponse = 0x93,
    GetVersion = 0x94,
    VersionResponse = 0x95,
}

impl Command {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x10 => Some(Self::SetRgb),
            0x80 => Some(Self::Ping),
            0x81 => Some(Self::PingResponse),
            0x90 => Some(Self::GetTemp),
            0x91 => Some(Self::TempResponse),
            0x92 => Some(Self::GetUptime),
            0x93 => Some(Self::UptimeResponse),
            0x94 => Some(Self::GetVersion),
            0x95 => Some(Self::VersionResponse),
            _ => None,
        }
    }

    /// The command a light answers a request with, if it answers at all.
    pub const fn response(self) -> Option<Self> {
        match self {
            Self::Ping => Some(Self::PingResponse),
            Self::GetTemp => Some(Self::TempResponse),
            Self::GetUptime => Some(Self::UptimeResponse),
            Self::GetVersion => Some(Self::VersionResponse),
            _ => None,
        }
    }
}

/// 24-bit RGB color.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn to_bytes(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    pub const fn from_bytes(bytes: [u8; 3]) -> Self {
        Self::new(bytes[0], bytes[1], bytes[2])
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    /// Raw command byte; unknown codes are kept so they can be reported.
    pub command: u8,
    pub data: [u8; 3],
}

impl Packet {
    pub const fn new(command: Command, data: [u8; 3]) -> Self {
        Self {
            command: command.code(),
            data,
        }
    }

    /// A request carrying no arguments (PING, GET_TEMP, ...).
    pub const fn request(command: Command) -> Self {
        Self::new(command, [0; 3])
    }

    pub const fn set_rgb(color: Color) -> Self {
        Self::new(Command::SetRgb, color.to_bytes())
    }

    pub const fn command(&self) -> Option<Command> {
        Command::from_code(self.command)
    }

    /// Big-endian signed word in `data[0..2]` (temperature responses).
    pub const fn word_i16(&self) -> i16 {
        i16::from_be_bytes([self.data[0], self.data[1]])
    }

    /// Big-endian unsigned word in `data[0..2]` (uptime responses).
    pub const fn word_u16(&self) -> u16 {
        u16::from_be_bytes([self.data[0], self.data[1]])
    }

    pub const fn to_bytes(self) -> [u8; PACKET_SIZE] {
        [self.command, self.data[0], self.data[1], self.data[2]]
    }

    pub const fn from_bytes(bytes: [u8; PACKET_SIZE]) -> Self {
        Self {
            command: bytes[0],
            data: [bytes[1], bytes[2], bytes[3]],
        }
    }
}

/// Whether packets carry the 2-byte header in front of the command byte.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    #[default]
    Bare,
    /// Header value, transmitted big-endian.
    Header(u16),
}

impl Framing {
    pub const fn from_header(header: Option<u16>) -> Self {
        match header {
            Some(value) => Self::Header(value),
            None => Self::Bare,
        }
    }

    /// Fixed payload size the physical layer must be configured with.
    pub const fn wire_size(self) -> usize {
        match self {
            Self::Bare => PACKET_SIZE,
            Self::Header(_) => MAX_WIRE_SIZE,
        }
    }

    pub fn encode(self, packet: &Packet) -> WirePacket {
        let mut bytes = [0u8; MAX_WIRE_SIZE];
        let body = packet.to_bytes();
        let len = match self {
            Self::Bare => {
                bytes[..PACKET_SIZE].copy_from_slice(&body);
                PACKET_SIZE
            }
            Self::Header(header) => {
                bytes[..HEADER_SIZE].copy_from_slice(&header.to_be_bytes());
                bytes[HEADER_SIZE..].copy_from_slice(&body);
                MAX_WIRE_SIZE
            }
        };
        WirePacket { bytes, len }
    }

    pub fn decode(self, bytes: &[u8]) -> Result<Packet, DecodeError> {
        if bytes.len() != self.wire_size() {
            return Err(DecodeError::WrongSize {
                expected: self.wire_size(),
                actual: bytes.len(),
            });
        }

        let body = match self {
            Self::Bare => bytes,
            Self::Header(expected) => {
                let actual = u16::from_be_bytes([bytes[0], bytes[1]]);
                if actual != expected {
                    return Err(DecodeError::BadHeader { expected, actual });
                }
                &bytes[HEADER_SIZE..]
            }
        };

        Ok(Packet::from_bytes([body[0], body[1], body[2], body[3]]))
    }
}

/// An encoded packet, sized for the configured framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WirePacket {
    bytes: [u8; MAX_WIRE_SIZE],
    len: usize,
}

impl WirePacket {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    WrongSize { expected: usize, actual: usize },
    BadHeader { expected: u16, actual: u16 },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongSize { expected, actual } => {
                write!(f, "expected {} byte packet, got {}", expected, actual)
            }
            Self::BadHeader { expected, actual } => {
                write!(f, "bad header {:#06x} (expected {:#06x})", actual, expected)
            }
        }
    }
}

/// Derives 40-bit transceiver addresses from endpoint ids.
///
/// The low byte is the endpoint id XORed with `xor`. Any XOR constant is a
/// bijection on bytes, so every id keeps a distinct address; a non-zero value
/// only exists to break up repetitive bit patterns on air. `xor = 0` leaves
/// ids untouched.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressScheme {
    pub prefix: u32,
    pub xor: u8,
}

impl AddressScheme {
    pub const fn new(prefix: u32, xor: u8) -> Self {
        Self { prefix, xor }
    }

    pub const fn address(self, id: u8) -> u64 {
        ((self.prefix as u64) << 8) | (id ^ self.xor) as u64
    }

    /// Inverse of [`AddressScheme::address`].
    pub const fn endpoint(self, address: u64) -> Option<u8> {
        if (address >> 8) != self.prefix as u64 {
            return None;
        }
        Some((address & 0xFF) as u8 ^ self.xor)
    }
}

impl Default for AddressScheme {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS_PREFIX, 0)
    }
}
