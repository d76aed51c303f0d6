use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::depacketizer::Depacketizer;
use super::packet::Packet;
use super::samplebuilder::{Sample, SampleBuilder, SampleBuilderStats};

/// What one listening session produced
#[derive(Debug, Clone, Serialize)]
pub struct ReceiveSummary {
    /// Datagrams read from the socket, valid or not
    pub datagrams: u64,
    /// Datagrams that parsed as RTP but were filtered out
    pub ignored: u64,
    /// Datagrams that did not parse as RTP
    pub malformed: u64,
    #[serde(skip)]
    pub samples: Vec<(Sample, u32)>,
    pub samples_emitted: usize,
    pub stats: SampleBuilderStats,
    pub cancelled: bool,
}

/// Feeds packets from a UDP socket into a [`SampleBuilder`]
///
/// The first SSRC seen is locked in; packets from other sources are ignored,
/// as are packets whose payload type does not match the configured one.
pub struct RtpReceiver<D> {
    socket: UdpSocket,
    builder: SampleBuilder<D>,
    payload_type: Option<u8>,
    ssrc: Option<u32>,
    samples: Vec<(Sample, u32)>,
    ignored: u64,
    malformed: u64,
}

impl<D: Depacketizer> RtpReceiver<D> {
    /// Bind to a specific port (or 0 for auto-assign)
    pub async fn bind(port: u16, builder: SampleBuilder<D>) -> Result<Self> {
        let addr = format!("0.0.0.0:{}", port);
        let socket = UdpSocket::bind(&addr)
            .await
            .context(format!("Failed to bind RTP socket on {}", addr))?;

        debug!("RTP receiver bound to port {}", port);
        Ok(Self::from_socket(socket, builder))
    }

    /// Create from an already-bound socket (avoids port race conditions)
    pub fn from_socket(socket: UdpSocket, builder: SampleBuilder<D>) -> Self {
        Self {
            socket,
            builder,
            payload_type: None,
            ssrc: None,
            samples: Vec::new(),
            ignored: 0,
            malformed: 0,
        }
    }

    /// Only reassemble packets carrying this payload type
    pub fn with_payload_type(mut self, payload_type: Option<u8>) -> Self {
        self.payload_type = payload_type;
        self
    }

    pub fn local_port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Receive for `duration` or until cancelled, then force-drain the builder
    pub async fn receive_for_cancellable(
        mut self,
        duration: Duration,
        cancel_token: CancellationToken,
    ) -> Result<ReceiveSummary> {
        let mut buf = [0u8; 2048];
        let deadline = tokio::time::Instant::now() + duration;
        let mut cancelled = false;
        let mut datagrams: u64 = 0;
        let mut first_packet_logged = false;

        loop {
            if cancel_token.is_cancelled() {
                debug!("RTP receive cancelled by shutdown signal");
                cancelled = true;
                break;
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }

            tokio::select! {
                result = timeout(remaining.min(Duration::from_millis(20)), self.socket.recv_from(&mut buf)) => {
                    match result {
                        Ok(Ok((len, addr))) => {
                            datagrams += 1;
                            if !first_packet_logged {
                                info!("First RTP packet received: {} bytes from {}", len, addr);
                                first_packet_logged = true;
                            }
                            self.process_datagram(&buf[..len]);
                        }
                        Ok(Err(e)) => {
                            warn!("RTP receive error: {}", e);
                        }
                        Err(_) => {}
                    }
                }
                _ = cancel_token.cancelled() => {
                    debug!("RTP receive cancelled by shutdown signal");
                    cancelled = true;
                    break;
                }
            }
        }

        self.flush();

        let stats = self.builder.stats();
        info!(
            "RTP receive done: {} datagrams, {} samples, {} packets lost",
            datagrams,
            self.samples.len(),
            stats.packets_lost
        );

        Ok(ReceiveSummary {
            datagrams,
            ignored: self.ignored,
            malformed: self.malformed,
            samples_emitted: self.samples.len(),
            samples: self.samples,
            stats,
            cancelled,
        })
    }

    fn process_datagram(&mut self, data: &[u8]) {
        let packet = match Packet::parse(data) {
            Ok(packet) => packet,
            Err(e) => {
                trace!("Dropping datagram: {}", e);
                self.malformed += 1;
                return;
            }
        };

        if let Some(expected) = self.payload_type {
            if packet.payload_type != expected {
                trace!("Ignoring payload type {} (want {})", packet.payload_type, expected);
                self.ignored += 1;
                return;
            }
        }

        match self.ssrc {
            None => {
                info!("Locked onto SSRC {:#010x}", packet.ssrc);
                self.ssrc = Some(packet.ssrc);
            }
            Some(ssrc) if ssrc != packet.ssrc => {
                trace!("Ignoring packet from SSRC {:#010x}", packet.ssrc);
                self.ignored += 1;
                return;
            }
            Some(_) => {}
        }

        self.builder.push(packet);
        while let Some(sample) = self.builder.pop_with_timestamp() {
            self.samples.push(sample);
        }
    }

    fn flush(&mut self) {
        while let Some(sample) = self.builder.force_pop_with_timestamp() {
            self.samples.push(sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::depacketizer::PassthroughDepacketizer;

    fn builder() -> SampleBuilder<PassthroughDepacketizer> {
        SampleBuilder::new(10, PassthroughDepacketizer, 8000)
            .unwrap()
            .with_partition_head_checker(|_: &[u8]| true)
    }

    #[tokio::test]
    async fn test_receive_for_cancellable_immediate_cancel() {
        let receiver = RtpReceiver::bind(0, builder()).await.unwrap();
        let cancel_token = CancellationToken::new();
        cancel_token.cancel();
        let summary = receiver
            .receive_for_cancellable(Duration::from_secs(10), cancel_token)
            .await
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.datagrams, 0);
        assert!(summary.samples.is_empty());
    }

    #[tokio::test]
    async fn test_filters_payload_type_and_foreign_ssrc() {
        let mut receiver = RtpReceiver::bind(0, builder()).await.unwrap().with_payload_type(Some(0));

        let pcmu = |seq: u16, ssrc: u32| Packet::new(seq, seq as u32 * 160, vec![0xFFu8; 4]).with_ssrc(ssrc);

        receiver.process_datagram(&pcmu(1, 7).to_bytes());
        receiver.process_datagram(&pcmu(2, 9).to_bytes()); // other source
        receiver.process_datagram(&pcmu(2, 7).with_payload_type(8).to_bytes()); // wrong type
        receiver.process_datagram(&[0x80, 0x00]); // too short
        receiver.process_datagram(&pcmu(2, 7).to_bytes());

        assert_eq!(receiver.ignored, 2);
        assert_eq!(receiver.malformed, 1);
        assert_eq!(receiver.builder.stats().packets_received, 2);
        assert_eq!(receiver.samples.len(), 1);
        assert_eq!(receiver.samples[0].1, 160);
    }
}
