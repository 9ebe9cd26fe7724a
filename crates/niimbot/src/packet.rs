//! Niimbot wire frame codec.
//!
//! Frame layout: `55 55 | cmd | len | payload.. | xor | aa aa`.
//! The checksum is the XOR of the command id, the length byte and every
//! payload byte. The codec is pure; it never touches the transport.

/// Frame start marker.
pub const START_MARKER: [u8; 2] = [0x55, 0x55];

/// Frame end marker.
pub const END_MARKER: [u8; 2] = [0xaa, 0xaa];

/// Largest payload a single frame can carry (length is one byte).
pub const MAX_PAYLOAD: usize = 255;

/// Bytes a frame adds around its payload.
const FRAME_OVERHEAD: usize = START_MARKER.len() + 2 + 1 + END_MARKER.len();

/// Why a received byte sequence is not a valid frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("framing error: {0}")]
    Framing(String),

    #[error("checksum mismatch: expected 0x{expected:02x}, got 0x{actual:02x}")]
    Checksum { expected: u8, actual: u8 },
}

/// A decoded (or to-be-encoded) protocol packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub command: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a packet, rejecting payloads that do not fit one frame.
    pub fn new(command: u8, payload: impl Into<Vec<u8>>) -> crate::Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD {
            return Err(crate::NiimbotError::Protocol(format!(
                "payload of {} bytes exceeds frame limit of {MAX_PAYLOAD}",
                payload.len()
            )));
        }
        Ok(Self { command, payload })
    }

    /// XOR checksum over command id, length and payload.
    pub fn checksum(&self) -> u8 {
        checksum(self.command, &self.payload)
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_OVERHEAD + self.payload.len());
        buf.extend_from_slice(&START_MARKER);
        buf.push(self.command);
        buf.push(self.payload.len() as u8);
        buf.extend_from_slice(&self.payload);
        buf.push(self.checksum());
        buf.extend_from_slice(&END_MARKER);
        buf
    }

    /// Parse one complete frame.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < FRAME_OVERHEAD {
            return Err(FrameError::Framing(format!(
                "frame too short ({} bytes)",
                data.len()
            )));
        }
        if data[..2] != START_MARKER {
            return Err(FrameError::Framing("missing start marker".into()));
        }
        if data[data.len() - 2..] != END_MARKER {
            return Err(FrameError::Framing("missing end marker".into()));
        }

        let command = data[2];
        let len = data[3] as usize;
        if data.len() != FRAME_OVERHEAD + len {
            return Err(FrameError::Framing(format!(
                "length byte says {len} payload bytes, frame carries {}",
                data.len() - FRAME_OVERHEAD
            )));
        }

        let payload = &data[4..4 + len];
        let actual = data[4 + len];
        let expected = checksum(command, payload);
        if actual != expected {
            return Err(FrameError::Checksum { expected, actual });
        }

        Ok(Self {
            command,
            payload: payload.to_vec(),
        })
    }
}

fn checksum(command: u8, payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(command ^ payload.len() as u8, |acc, &b| acc ^ b)
}
