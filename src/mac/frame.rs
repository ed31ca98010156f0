// Frame format: [Dest:3] [Src:3] [Type:1] [Seq:1] [Len:2] [HCS:1] [Payload:Len] [CRC16:2]
// HCS is a CRC8 over the ten bytes before it, checked before the length is trusted.

use std::fmt;
use std::io::{Cursor, Read};
use std::str::FromStr;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use tracing::debug;

use super::crc::{calculate_crc8, calculate_crc16, verify_crc16};
use crate::error::{LinkError, Result};

/// Bytes before the payload, header check included.
pub const HEADER_LEN: usize = 11;
/// Header bytes covered by the header check.
const HCS_OFFSET: usize = HEADER_LEN - 1;
pub const CRC_LEN: usize = 2;

/// Three-byte station address, written `a.b.c`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StationId(pub [u8; 3]);

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0[0], self.0[1], self.0[2])
    }
}

impl FromStr for StationId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(format!("station id '{}' must look like a.b.c", s));
        }
        let mut id = [0u8; 3];
        for (slot, part) in id.iter_mut().zip(parts) {
            *slot = part
                .trim()
                .parse()
                .map_err(|e| format!("bad station id component '{}': {}", part, e))?;
        }
        Ok(StationId(id))
    }
}

impl From<[u8; 3]> for StationId {
    fn from(bytes: [u8; 3]) -> Self {
        StationId(bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Ack,
    /// Any nonzero type byte; the value is left to the upper layer.
    Data(u8),
}

impl FrameType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => FrameType::Ack,
            v => FrameType::Data(v),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            FrameType::Ack => 0,
            FrameType::Data(v) => v,
        }
    }
}

/// Link frame. Immutable once built; the constructors enforce that a data
/// frame never carries type 0 and that the payload fits the length field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    dest: StationId,
    src: StationId,
    frame_type: FrameType,
    seq: u8,
    payload: Vec<u8>,
}

impl Frame {
    pub fn new_data(
        dest: StationId,
        src: StationId,
        variant: u8,
        seq: u8,
        payload: Vec<u8>,
    ) -> Result<Self> {
        if variant == 0 {
            return Err(LinkError::InvalidFrameType(variant));
        }
        if payload.len() > u16::MAX as usize {
            return Err(LinkError::PayloadTooLarge {
                len: payload.len(),
                max: u16::MAX as usize,
            });
        }
        Ok(Self {
            dest,
            src,
            frame_type: FrameType::Data(variant),
            seq,
            payload,
        })
    }

    /// ACK for frame `seq`, sent by `from` back to `to`.
    pub fn new_ack(to: StationId, from: StationId, seq: u8) -> Self {
        Self {
            dest: to,
            src: from,
            frame_type: FrameType::Ack,
            seq,
            payload: Vec::new(),
        }
    }

    pub fn dest(&self) -> StationId {
        self.dest
    }

    pub fn src(&self) -> StationId {
        self.src
    }

    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    pub fn seq(&self) -> u8 {
        self.seq
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn is_ack(&self) -> bool {
        self.frame_type == FrameType::Ack
    }

    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len() + CRC_LEN
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.wire_len()];
        bytes[0..3].copy_from_slice(&self.dest.0);
        bytes[3..6].copy_from_slice(&self.src.0);
        bytes[6] = self.frame_type.to_u8();
        bytes[7] = self.seq;
        BigEndian::write_u16(&mut bytes[8..10], self.payload.len() as u16);
        bytes[HCS_OFFSET] = calculate_crc8(&bytes[..HCS_OFFSET]);
        bytes[HEADER_LEN..HEADER_LEN + self.payload.len()].copy_from_slice(&self.payload);

        let body = bytes.len() - CRC_LEN;
        let crc = calculate_crc16(&bytes[..body]);
        BigEndian::write_u16(&mut bytes[body..], crc);
        bytes
    }

    /// Parses and checks a received frame. Trailing bytes beyond the
    /// declared length (symbol padding) are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let total = Self::wire_len_from_header(bytes).ok_or_else(|| {
            LinkError::CorruptedFrame(format!("bad header ({} bytes received)", bytes.len()))
        })?;
        if bytes.len() < total {
            return Err(LinkError::CorruptedFrame(format!(
                "truncated: {} of {} bytes",
                bytes.len(),
                total
            )));
        }

        let body = &bytes[..total - CRC_LEN];
        let crc = BigEndian::read_u16(&bytes[total - CRC_LEN..total]);
        if !verify_crc16(body, crc) {
            debug!("CRC check failed");
            return Err(LinkError::CorruptedFrame("CRC mismatch".into()));
        }

        let mut rdr = Cursor::new(body);
        let mut dest = [0u8; 3];
        let mut src = [0u8; 3];
        rdr.read_exact(&mut dest)?;
        rdr.read_exact(&mut src)?;
        let frame_type = FrameType::from_u8(rdr.read_u8()?);
        let seq = rdr.read_u8()?;
        let len = rdr.read_u16::<BigEndian>()? as usize;
        let _hcs = rdr.read_u8()?;
        let mut payload = vec![0u8; len];
        rdr.read_exact(&mut payload)?;

        Ok(Self {
            dest: StationId(dest),
            src: StationId(src),
            frame_type,
            seq,
            payload,
        })
    }

    /// Total wire length announced by a header, or `None` if `header` is
    /// shorter than [`HEADER_LEN`] or fails its header check.
    pub fn wire_len_from_header(header: &[u8]) -> Option<usize> {
        if header.len() < HEADER_LEN {
            return None;
        }
        if calculate_crc8(&header[..HCS_OFFSET]) != header[HCS_OFFSET] {
            debug!("Header check failed");
            return None;
        }
        let len = BigEndian::read_u16(&header[8..10]) as usize;
        Some(HEADER_LEN + len + CRC_LEN)
    }

    /// Longest wire frame carrying at most `max_payload` bytes.
    pub fn max_wire_len(max_payload: usize) -> usize {
        HEADER_LEN + max_payload + CRC_LEN
    }
}
