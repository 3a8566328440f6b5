//! RFC 6455 frame layout.
//!
//! ```text
//!  0               1               2               3
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |     Masking-key (0 or 4 bytes), then payload                  |
//! +---------------------------------------------------------------+
//! ```

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

pub const FIN_BIT: u8 = 0x80;
pub const RSV_BITS: u8 = 0x70;
pub const OPCODE_MASK: u8 = 0x0F;
pub const MASK_BIT: u8 = 0x80;
pub const LEN_MASK: u8 = 0x7F;

/// Largest payload that fits in the 7-bit length field.
pub const MAX_SHORT_LEN: usize = 125;
pub const LEN_16: u8 = 126;
pub const LEN_64: u8 = 127;

/// Control frames carry at most this much payload.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Reserved(u8),
}

impl Opcode {
    pub fn from_bits(bits: u8) -> Self {
        match bits & OPCODE_MASK {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            other => Opcode::Reserved(other),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
            Opcode::Reserved(bits) => bits & OPCODE_MASK,
        }
    }

    pub fn is_control(self) -> bool {
        self.bits() & 0x8 != 0
    }
}

/// Status codes this server sends in close frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    Normal = 1000,
    ProtocolError = 1002,
    UnsupportedData = 1003,
    MessageTooBig = 1009,
}

impl CloseCode {
    pub fn code(self) -> u16 {
        self as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    /// Raw RSV1..RSV3 bits, still in their byte position.
    pub rsv: u8,
    pub opcode: Opcode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
}

/// Read one frame header: the two fixed bytes, any extended length, and the
/// masking key.
pub async fn read_header<R>(reader: &mut R) -> std::io::Result<FrameHeader>
where
    R: AsyncRead + Unpin,
{
    let mut fixed = [0u8; 2];
    reader.read_exact(&mut fixed).await?;

    let payload_len = match fixed[1] & LEN_MASK {
        LEN_16 => u64::from(reader.read_u16().await?),
        LEN_64 => reader.read_u64().await?,
        short => u64::from(short),
    };

    let mask = if fixed[1] & MASK_BIT != 0 {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key).await?;
        Some(key)
    } else {
        None
    };

    Ok(FrameHeader {
        fin: fixed[0] & FIN_BIT != 0,
        rsv: fixed[0] & RSV_BITS,
        opcode: Opcode::from_bits(fixed[0]),
        mask,
        payload_len,
    })
}

/// Serialize a complete frame. Lengths use the shortest encoding that fits.
pub fn encode_frame(fin: bool, opcode: Opcode, payload: &[u8], mask: Option<[u8; 4]>) -> BytesMut {
    let mut out = BytesMut::with_capacity(payload.len() + 14);

    let mut first = opcode.bits();
    if fin {
        first |= FIN_BIT;
    }
    out.put_u8(first);

    let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
    let len = payload.len();
    if len <= MAX_SHORT_LEN {
        out.put_u8(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        out.put_u8(mask_bit | LEN_16);
        out.put_u16(len as u16);
    } else {
        out.put_u8(mask_bit | LEN_64);
        out.put_u64(len as u64);
    }

    match mask {
        Some(key) => {
            out.put_slice(&key);
            let start = out.len();
            out.put_slice(payload);
            apply_mask(&mut out[start..], key, 0);
        }
        None => out.put_slice(payload),
    }
    out
}

/// XOR `buf` with the masking key. `offset` is the position of `buf[0]`
/// within the frame payload, for payloads unmasked in pieces.
pub fn apply_mask(buf: &mut [u8], key: [u8; 4], offset: usize) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[(offset + i) % 4];
    }
}

/// Close frame payload: the status code in network byte order.
pub fn close_payload(code: u16) -> [u8; 2] {
    code.to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn decode(bytes: &[u8]) -> (FrameHeader, Vec<u8>) {
        let mut reader = bytes;
        let header = read_header(&mut reader).await.unwrap();
        let mut payload = reader.to_vec();
        if let Some(key) = header.mask {
            apply_mask(&mut payload, key, 0);
        }
        (header, payload)
    }

    #[tokio::test]
    async fn test_length_encoding_boundaries() {
        for (len, header_len) in [(0, 2), (125, 2), (126, 4), (65535, 4), (65536, 10)] {
            let payload = vec![0x5A; len];
            let frame = encode_frame(true, Opcode::Text, &payload, None);
            assert_eq!(frame.len(), header_len + len, "payload of {} bytes", len);

            let (header, decoded) = decode(&frame).await;
            assert_eq!(header.payload_len, len as u64);
            assert!(header.fin);
            assert_eq!(header.opcode, Opcode::Text);
            assert_eq!(decoded.len(), len);
        }
    }

    #[test]
    fn test_short_frame_layout() {
        let frame = encode_frame(true, Opcode::Text, b"OK", None);
        assert_eq!(&frame[..], &[0x81, 0x02, b'O', b'K']);
    }

    #[tokio::test]
    async fn test_masked_frame() {
        let key = [0x37, 0xFA, 0x21, 0x3D];
        let frame = encode_frame(true, Opcode::Text, b"Hello", Some(key));
        // Sample from RFC 6455 section 5.7.
        assert_eq!(
            &frame[..],
            &[0x81, 0x85, 0x37, 0xFA, 0x21, 0x3D, 0x7F, 0x9F, 0x4D, 0x51, 0x58]
        );

        let (header, payload) = decode(&frame).await;
        assert_eq!(header.mask, Some(key));
        assert_eq!(payload, b"Hello");
    }

    #[test]
    fn test_mask_with_offset_matches_whole_payload() {
        let key = [1, 2, 3, 4];
        let mut whole = b"abcdefghij".to_vec();
        apply_mask(&mut whole, key, 0);

        let mut pieces = b"abcdefghij".to_vec();
        let (head, tail) = pieces.split_at_mut(3);
        apply_mask(head, key, 0);
        apply_mask(tail, key, 3);
        assert_eq!(pieces, whole);
    }

    #[test]
    fn test_opcode_classes() {
        assert!(Opcode::Close.is_control());
        assert!(Opcode::Ping.is_control());
        assert!(Opcode::Reserved(0xB).is_control());
        assert!(!Opcode::Text.is_control());
        assert!(!Opcode::Continuation.is_control());
        assert_eq!(Opcode::from_bits(0x81), Opcode::Text);
        assert_eq!(Opcode::from_bits(0x03), Opcode::Reserved(3));
    }
}
