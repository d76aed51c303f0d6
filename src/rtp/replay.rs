/// Offline reassembly from pcap captures
///
/// Loads UDP payloads from a capture (Ethernet/IPv4/UDP framing) and runs them
/// through a [`SampleBuilder`] in capture order. Deterministic, so it doubles
/// as a regression harness for recorded streams.
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, trace};

use super::depacketizer::Depacketizer;
use super::packet::Packet;
use super::samplebuilder::{Sample, SampleBuilder, SampleBuilderStats};

const ETHERNET_HEADER_LEN: usize = 14;
const UDP_HEADER_LEN: usize = 8;
const IPPROTO_UDP: u8 = 17;

/// One UDP datagram lifted out of a capture
#[derive(Debug, Clone)]
pub struct CapturedPacket {
    /// Timestamp relative to first packet (microseconds)
    pub timestamp_us: u64,
    /// Raw UDP payload (RTP data)
    pub data: Vec<u8>,
    pub src_port: u16,
    pub dst_port: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub packets_replayed: usize,
    pub packets_skipped: usize,
    #[serde(skip)]
    pub samples: Vec<(Sample, u32)>,
    pub samples_emitted: usize,
    pub stats: SampleBuilderStats,
}

/// Load UDP datagrams from a pcap file
pub fn load_pcap<P: AsRef<Path>>(path: P) -> Result<Vec<CapturedPacket>> {
    use std::fs::File;
    use std::io::BufReader;

    let file = File::open(path.as_ref())
        .context(format!("Failed to open pcap file: {:?}", path.as_ref()))?;
    load_pcap_from_reader(BufReader::new(file))
}

pub fn load_pcap_from_reader<R: std::io::Read>(reader: R) -> Result<Vec<CapturedPacket>> {
    use pcap_file::pcap::PcapReader;

    let mut pcap_reader = PcapReader::new(reader).context("Failed to parse pcap file")?;

    let mut packets = Vec::new();
    let mut first_ts: Option<u64> = None;

    while let Some(pkt) = pcap_reader.next_packet() {
        let pkt = pkt.context("Failed to read packet")?;

        let ts_us = pkt.timestamp.as_micros() as u64;
        let relative_ts = match first_ts {
            None => {
                first_ts = Some(ts_us);
                0
            }
            Some(first) => ts_us.saturating_sub(first),
        };

        if let Some(captured) = parse_udp_payload(&pkt.data, relative_ts) {
            packets.push(captured);
        }
    }

    info!("Loaded {} UDP packets from pcap", packets.len());
    Ok(packets)
}

/// Strip Ethernet, IPv4 and UDP headers
fn parse_udp_payload(data: &[u8], timestamp_us: u64) -> Option<CapturedPacket> {
    let ip_data = data.get(ETHERNET_HEADER_LEN..)?;

    let ip_version = ip_data.first()? >> 4;
    if ip_version != 4 {
        trace!("Skipping non-IPv4 packet (version={})", ip_version);
        return None;
    }

    let ip_header_len = ((ip_data[0] & 0x0F) as usize) * 4;
    if ip_header_len < 20 || ip_data.len() < ip_header_len + UDP_HEADER_LEN {
        return None;
    }

    let protocol = ip_data[9];
    if protocol != IPPROTO_UDP {
        trace!("Skipping non-UDP packet (protocol={})", protocol);
        return None;
    }

    let udp_data = &ip_data[ip_header_len..];
    let src_port = u16::from_be_bytes([udp_data[0], udp_data[1]]);
    let dst_port = u16::from_be_bytes([udp_data[2], udp_data[3]]);
    let udp_len = u16::from_be_bytes([udp_data[4], udp_data[5]]) as usize;
    if udp_len < UDP_HEADER_LEN || udp_data.len() < udp_len {
        return None;
    }

    Some(CapturedPacket {
        timestamp_us,
        data: udp_data[UDP_HEADER_LEN..udp_len].to_vec(),
        src_port,
        dst_port,
    })
}

/// Push every captured packet through `builder`, popping as it goes,
/// then force-drain what is left.
///
/// With `dst_port` set, datagrams sent to other ports are skipped.
pub fn replay<D: Depacketizer>(
    packets: &[CapturedPacket],
    builder: &mut SampleBuilder<D>,
    dst_port: Option<u16>,
) -> ReplaySummary {
    let mut samples = Vec::new();
    let mut replayed = 0;
    let mut skipped = 0;

    for captured in packets {
        if dst_port.is_some_and(|port| port != captured.dst_port) {
            skipped += 1;
            continue;
        }
        let packet = match Packet::parse(&captured.data) {
            Ok(packet) => packet,
            Err(e) => {
                trace!("Skipping captured datagram at {}us: {}", captured.timestamp_us, e);
                skipped += 1;
                continue;
            }
        };

        builder.push(packet);
        replayed += 1;
        samples.extend(std::iter::from_fn(|| builder.pop_with_timestamp()));
    }

    samples.extend(std::iter::from_fn(|| builder.force_pop_with_timestamp()));

    debug!("Replay complete: {} packets, {} samples", replayed, samples.len());
    ReplaySummary {
        packets_replayed: replayed,
        packets_skipped: skipped,
        samples_emitted: samples.len(),
        samples,
        stats: builder.stats(),
    }
}
