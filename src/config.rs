use anyhow::{bail, Context, Result};
use std::env;
use std::fmt;
use std::str::FromStr;

#[cfg(test)]
use std::collections::HashMap;

use crate::error::MAX_LATE_LIMIT;

/// Payload format of the incoming stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// One frame per packet, marker bit closes a frame
    Raw,
    /// VP8 (RFC 7741), with partition-head resynchronization
    Vp8,
}

impl FromStr for Codec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "raw" | "passthrough" => Ok(Codec::Raw),
            "vp8" => Ok(Codec::Vp8),
            other => bail!("unknown codec '{}' (expected raw or vp8)", other),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Raw => f.write_str("raw"),
            Codec::Vp8 => f.write_str("vp8"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Reassembly settings
    pub max_late: u16,
    pub sample_rate: u32,
    pub codec: Codec,

    // Receiver settings
    pub rtp_port: u16,
    pub listen_duration_secs: u64,

    // Only packets with this payload type are reassembled (optional)
    pub payload_type: Option<u8>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_late: 50,
            sample_rate: 90_000,
            codec: Codec::Raw,
            rtp_port: 5004,
            listen_duration_secs: 10,
            payload_type: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env if present, ignore if missing
        Self::from_getter(|key| env::var(key).ok())
    }

    /// Parse config from a custom getter function (for testing)
    pub fn from_getter<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        Ok(Config {
            max_late: match get("SAMPLEBUILDER_MAX_LATE") {
                Some(v) => v
                    .trim()
                    .parse()
                    .context("SAMPLEBUILDER_MAX_LATE must be a packet count")?,
                None => defaults.max_late,
            },
            sample_rate: match get("SAMPLEBUILDER_SAMPLE_RATE") {
                Some(v) => v
                    .trim()
                    .parse()
                    .context("SAMPLEBUILDER_SAMPLE_RATE must be a clock rate in Hz")?,
                None => defaults.sample_rate,
            },
            codec: match get("SAMPLEBUILDER_CODEC") {
                Some(v) => v.parse().context("SAMPLEBUILDER_CODEC is invalid")?,
                None => defaults.codec,
            },

            rtp_port: get("RTP_PORT")
                .unwrap_or_else(|| "5004".to_string())
                .parse()
                .context("RTP_PORT must be a valid port number")?,
            listen_duration_secs: get("LISTEN_DURATION_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.listen_duration_secs),

            payload_type: match get("RTP_PAYLOAD_TYPE").filter(|s| !s.is_empty()) {
                Some(v) => Some(v.parse().context("RTP_PAYLOAD_TYPE must be a number")?),
                None => None,
            },
        })
    }

    /// Create config from a HashMap (convenience for testing)
    #[cfg(test)]
    pub fn from_map(map: &HashMap<&str, &str>) -> Result<Self> {
        Self::from_getter(|key| map.get(key).map(|v| v.to_string()))
    }

    /// Validate configuration values at startup.
    /// Returns Ok(()) if all validations pass, or Err with details of what failed.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.max_late == 0 {
            errors.push("SAMPLEBUILDER_MAX_LATE must be at least 1.".to_string());
        } else if self.max_late > MAX_LATE_LIMIT {
            errors.push(format!(
                "SAMPLEBUILDER_MAX_LATE={} exceeds the maximum of {}.",
                self.max_late, MAX_LATE_LIMIT
            ));
        }

        if self.sample_rate == 0 {
            errors.push("SAMPLEBUILDER_SAMPLE_RATE must be greater than 0.".to_string());
        }

        if let Some(pt) = self.payload_type {
            if pt > 127 {
                errors.push(format!("RTP_PAYLOAD_TYPE={} is not a 7-bit payload type.", pt));
            }
        }

        if self.listen_duration_secs == 0 {
            errors.push("LISTEN_DURATION_SECS must be greater than 0.".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )
        }
    }
}


#[cfg(kani)]
mod kani_proofs {
    use super::*;

    #[kani::proof]
    #[kani::unwind(10)]
    fn codec_parse_never_panics() {
        let bytes: [u8; 4] = kani::any();
        if let Ok(s) = std::str::from_utf8(&bytes) {
            let _ = s.parse::<Codec>();
        }
    }
}
