//! Error types for the sample builder library

use thiserror::Error;

/// Largest accepted loss window; keeps the ring under half the sequence space
pub const MAX_LATE_LIMIT: u16 = 0x3FFF;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Loss window outside `1..=MAX_LATE_LIMIT`
    #[error("max_late must be between 1 and {limit}, got {got}")]
    InvalidMaxLate { got: u16, limit: u16 },

    #[error("sample rate must be greater than zero")]
    InvalidSampleRate,

    /// Depacketizer could not make sense of a payload
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("RTP packet truncated: {len} bytes, header needs {needed}")]
    TruncatedPacket { len: usize, needed: usize },

    #[error("unsupported RTP version {0}")]
    UnsupportedVersion(u8),
}

pub type Result<T> = std::result::Result<T, Error>;
