use super::error::ServerError;
use crate::constants::MAX_FRAME_BYTES;

/// Plain eDonkey frame.
pub const PROTO_EDONKEY: u8 = 0xE3;
/// eMule extension frame.
pub const PROTO_EMULE: u8 = 0xC5;
/// zlib-packed frame: the `(opcode, payload)` tuple is deflated.
pub const PROTO_PACKED: u8 = 0xD4;

/// Length of the frame header in octets.
pub const HEADER_LEN: usize = 6;

/// The six-octet frame header: `protocol`, little-endian `size`
/// (counting the opcode octet plus payload), and the opcode itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub protocol: u8,
    pub size: u32,
    pub opcode: u8,
}

impl FrameHeader {
    /// Builds a plain outbound header for a payload of `payload_len`
    /// octets. Outbound frames are never compressed.
    pub fn plain(opcode: u8, payload_len: usize) -> Self {
        Self {
            protocol: PROTO_EDONKEY,
            size: payload_len as u32 + 1,
            opcode,
        }
    }

    /// Encodes the header.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut raw = [0u8; HEADER_LEN];
        raw[0] = self.protocol;
        raw[1..5].copy_from_slice(&self.size.to_le_bytes());
        raw[5] = self.opcode;
        raw
    }

    /// Decodes and validates a header read off the wire.
    ///
    /// # Errors
    ///
    /// - [`ServerError::InvalidProtocolType`] for an unknown protocol
    ///   byte; the stream is no longer trusted.
    /// - [`ServerError::DecodePacket`] for a size that cannot hold the
    ///   opcode octet or exceeds the frame cap.
    pub fn decode(raw: &[u8; HEADER_LEN]) -> Result<Self, ServerError> {
        let protocol = raw[0];
        if !matches!(protocol, PROTO_EDONKEY | PROTO_EMULE | PROTO_PACKED) {
            return Err(ServerError::InvalidProtocolType(protocol));
        }

        let size = u32::from_le_bytes([raw[1], raw[2], raw[3], raw[4]]);
        if size == 0 {
            return Err(ServerError::DecodePacket("frame size is zero".into()));
        }
        if size as usize - 1 > MAX_FRAME_BYTES {
            return Err(ServerError::DecodePacket(format!(
                "frame payload of {} bytes exceeds cap",
                size - 1
            )));
        }

        Ok(Self {
            protocol,
            size,
            opcode: raw[5],
        })
    }

    /// Octets of payload following the header and opcode.
    pub fn payload_len(&self) -> usize {
        self.size as usize - 1
    }

    /// Returns `true` for zlib-packed frames.
    pub fn is_packed(&self) -> bool {
        self.protocol == PROTO_PACKED
    }
}
