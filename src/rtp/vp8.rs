/// VP8 RTP payload format (RFC 7741)
///
/// Each payload starts with a descriptor:
///
/// ```text
///       0 1 2 3 4 5 6 7
///      +-+-+-+-+-+-+-+-+
///      |X|R|N|S|R| PID |  required
///      +-+-+-+-+-+-+-+-+
/// X:   |I|L|T|K| RSV   |  optional
///      +-+-+-+-+-+-+-+-+
/// I:   |M| PictureID   |  optional, second byte when M is set
///      +-+-+-+-+-+-+-+-+
/// L:   |   TL0PICIDX   |  optional
///      +-+-+-+-+-+-+-+-+
/// T/K: |TID|Y| KEYIDX  |  optional
///      +-+-+-+-+-+-+-+-+
/// ```
use bytes::Bytes;

use super::depacketizer::{Depacketizer, PartitionHeadChecker};
use crate::error::{Error, Result};

const X_BIT: u8 = 0x80;
const S_BIT: u8 = 0x10;
const PID_MASK: u8 = 0x07;

const I_BIT: u8 = 0x80;
const L_BIT: u8 = 0x40;
const T_BIT: u8 = 0x20;
const K_BIT: u8 = 0x10;
const M_BIT: u8 = 0x80;

/// Length of the payload descriptor, or None if it runs past the payload
fn descriptor_len(payload: &[u8]) -> Option<usize> {
    let first = *payload.first()?;
    if first & X_BIT == 0 {
        return Some(1);
    }

    let ext = *payload.get(1)?;
    let mut len = 2;
    if ext & I_BIT != 0 {
        let picture_id = *payload.get(len)?;
        len += if picture_id & M_BIT != 0 { 2 } else { 1 };
    }
    if ext & L_BIT != 0 {
        len += 1;
    }
    if ext & (T_BIT | K_BIT) != 0 {
        len += 1;
    }

    if len > payload.len() {
        None
    } else {
        Some(len)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Vp8Depacketizer;

impl Depacketizer for Vp8Depacketizer {
    fn depacketize(&self, payload: &Bytes) -> Result<Bytes> {
        let len = descriptor_len(payload).ok_or_else(|| {
            Error::MalformedPayload(format!("VP8 descriptor truncated ({} bytes)", payload.len()))
        })?;
        if len >= payload.len() {
            return Err(Error::MalformedPayload("VP8 payload carries no frame data".to_string()));
        }
        Ok(payload.slice(len..))
    }

    fn is_final_fragment(&self, marker: bool) -> bool {
        marker
    }
}

/// A VP8 frame starts at the first packet of partition 0 (S set, PID 0)
#[derive(Debug, Clone, Copy, Default)]
pub struct Vp8PartitionHeadChecker;

impl PartitionHeadChecker for Vp8PartitionHeadChecker {
    fn is_partition_head(&self, payload: &[u8]) -> bool {
        match payload.first() {
            Some(&first) => first & S_BIT != 0 && first & PID_MASK == 0,
            None => false,
        }
    }
}
