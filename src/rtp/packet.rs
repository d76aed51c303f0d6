/// RTP packet model and header parsing
///
/// Only the fields reassembly needs are kept. CSRC lists and header
/// extensions are skipped over, never interpreted.
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Fixed RTP header size (no CSRCs, no extension)
pub const RTP_HEADER_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub payload_type: u8,
    pub marker: bool,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(sequence: u16, timestamp: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            payload_type: 0,
            marker: false,
            sequence,
            timestamp,
            ssrc: 0,
            payload: payload.into(),
        }
    }

    pub fn with_marker(mut self, marker: bool) -> Self {
        self.marker = marker;
        self
    }

    pub fn with_payload_type(mut self, payload_type: u8) -> Self {
        self.payload_type = payload_type & 0x7F;
        self
    }

    pub fn with_ssrc(mut self, ssrc: u32) -> Self {
        self.ssrc = ssrc;
        self
    }

    /// Parse an RTP packet from a UDP datagram
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < RTP_HEADER_LEN {
            return Err(Error::TruncatedPacket { len: data.len(), needed: RTP_HEADER_LEN });
        }

        let version = (data[0] >> 6) & 0x03;
        if version != 2 {
            return Err(Error::UnsupportedVersion(version));
        }

        let has_padding = (data[0] & 0x20) != 0;
        let has_extension = (data[0] & 0x10) != 0;
        let cc = (data[0] & 0x0F) as usize;

        let mut offset = RTP_HEADER_LEN + cc * 4;
        if data.len() < offset {
            return Err(Error::TruncatedPacket { len: data.len(), needed: offset });
        }

        if has_extension {
            if data.len() < offset + 4 {
                return Err(Error::TruncatedPacket { len: data.len(), needed: offset + 4 });
            }
            let ext_words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + ext_words * 4;
            if data.len() < offset {
                return Err(Error::TruncatedPacket { len: data.len(), needed: offset });
            }
        }

        let mut end = data.len();
        if has_padding {
            let pad = data[end - 1] as usize;
            if pad == 0 || offset + pad > end {
                return Err(Error::MalformedPayload(format!(
                    "padding of {} bytes does not fit a {} byte packet",
                    pad,
                    data.len()
                )));
            }
            end -= pad;
        }

        Ok(Self {
            payload_type: data[1] & 0x7F,
            marker: (data[1] & 0x80) != 0,
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            payload: Bytes::copy_from_slice(&data[offset..end]),
        })
    }

    /// Serialize with a minimal header (V=2, no padding, no CSRCs, no extension)
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RTP_HEADER_LEN + self.payload.len());
        buf.put_u8(0x80);
        buf.put_u8((u8::from(self.marker) << 7) | (self.payload_type & 0x7F));
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}
