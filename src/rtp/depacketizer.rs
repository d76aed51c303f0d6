//! Codec collaborators consumed by the sample builder
//!
//! A [`Depacketizer`] turns one RTP payload into a fragment of a media frame
//! and says whether a marker bit ends the frame. A [`PartitionHeadChecker`]
//! recognizes payloads that begin an independently decodable frame, letting
//! the builder resynchronize after loss without waiting out the window.

use bytes::Bytes;

use crate::error::Result;

pub trait Depacketizer {
    /// Decode one payload into the bytes it contributes to its frame
    fn depacketize(&self, payload: &Bytes) -> Result<Bytes>;

    /// Whether a packet carrying this marker bit is the last one of its frame
    fn is_final_fragment(&self, marker: bool) -> bool;
}

pub trait PartitionHeadChecker {
    fn is_partition_head(&self, payload: &[u8]) -> bool;
}

impl<F> PartitionHeadChecker for F
where
    F: Fn(&[u8]) -> bool,
{
    fn is_partition_head(&self, payload: &[u8]) -> bool {
        self(payload)
    }
}

impl<D: Depacketizer + ?Sized> Depacketizer for Box<D> {
    fn depacketize(&self, payload: &Bytes) -> Result<Bytes> {
        (**self).depacketize(payload)
    }

    fn is_final_fragment(&self, marker: bool) -> bool {
        (**self).is_final_fragment(marker)
    }
}

/// Payloads are frames as-is; the marker bit closes a frame.
///
/// Fits audio codecs that put one frame per packet (Opus, G.711).
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughDepacketizer;

impl Depacketizer for PassthroughDepacketizer {
    fn depacketize(&self, payload: &Bytes) -> Result<Bytes> {
        Ok(payload.clone())
    }

    fn is_final_fragment(&self, marker: bool) -> bool {
        marker
    }
}
