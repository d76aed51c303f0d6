//! RTP sample builder - reassembles media frames from RTP packets
//!
//! Packets go in as they arrive (lost, late, duplicated, reordered); whole
//! frames come out in order, with anything that cannot be proven complete
//! thrown away. This module exports internal components for integration testing.

pub mod cli;
pub mod config;
pub mod error;
pub mod rtp;

pub use error::{Error, Result};
