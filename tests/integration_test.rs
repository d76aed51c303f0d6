/// End-to-end tests: RTP over loopback UDP and from pcap files on disk,
/// through the same builder construction the binary uses
use std::time::Duration;

use pcap_file::pcap::{PcapPacket, PcapWriter};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use samplebuilder::config::{Codec, Config};
use samplebuilder::rtp::{self, replay, Packet, RtpReceiver};

const SSRC: u32 = 0x5EED_0001;

/// Two packets per VP8 frame; the first opens partition 0
fn vp8_frame(frame: u16) -> [Packet; 2] {
    let seq = 1000 + frame * 2;
    let ts = frame as u32 * 3000;
    let k = frame as u8;
    [
        Packet::new(seq, ts, vec![0x10, k, 0xA0]).with_payload_type(96).with_ssrc(SSRC),
        Packet::new(seq + 1, ts, vec![0x00, k, 0xB0])
            .with_marker(true)
            .with_payload_type(96)
            .with_ssrc(SSRC),
    ]
}

fn expected_frame(frame: u16) -> Vec<u8> {
    let k = frame as u8;
    vec![k, 0xA0, k, 0xB0]
}

fn vp8_config() -> Config {
    Config {
        codec: Codec::Vp8,
        payload_type: Some(96),
        ..Config::default()
    }
}

#[tokio::test]
async fn test_loopback_stream_with_reorder_duplicate_and_noise() {
    let config = vp8_config();
    let receiver = RtpReceiver::bind(0, rtp::builder_for(&config).unwrap())
        .await
        .unwrap()
        .with_payload_type(config.payload_type);
    let port = receiver.local_port().unwrap();

    let cancel_token = CancellationToken::new();
    let stop = cancel_token.clone();
    let sender = tokio::spawn(async move {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = format!("127.0.0.1:{}", port);

        let mut datagrams = Vec::new();
        for frame in 0..10u16 {
            let [first, second] = vp8_frame(frame);
            if frame == 3 {
                datagrams.push(second.to_bytes());
                datagrams.push(first.to_bytes());
            } else {
                datagrams.push(first.to_bytes());
                datagrams.push(second.to_bytes());
            }
            if frame == 5 {
                datagrams.push(second.to_bytes()); // duplicate
                datagrams.push(first.clone().with_ssrc(0xBAD).to_bytes()); // another source
                datagrams.push(bytes::Bytes::from_static(b"not rtp"));
            }
        }

        for datagram in &datagrams {
            socket.send_to(datagram, &target).await.unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        stop.cancel();
        datagrams.len()
    });

    let summary = receiver
        .receive_for_cancellable(Duration::from_secs(5), cancel_token)
        .await
        .unwrap();
    let sent = sender.await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.datagrams, sent as u64);
    assert_eq!(summary.malformed, 1);
    assert_eq!(summary.ignored, 1);
    assert_eq!(summary.stats.packets_dropped, 1);
    assert_eq!(summary.stats.packets_lost, 0);

    let frames: Vec<Vec<u8>> = summary.samples.iter().map(|(s, _)| s.data.to_vec()).collect();
    let expected: Vec<Vec<u8>> = (0..10).map(expected_frame).collect();
    assert_eq!(frames, expected);
    let timestamps: Vec<u32> = summary.samples.iter().map(|(_, ts)| *ts).collect();
    assert_eq!(timestamps, (0..10).map(|f| f * 3000).collect::<Vec<u32>>());

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["samples_emitted"], 10);
    assert_eq!(json["stats"]["packets_received"], 21);
}

/// Wrap a UDP payload in Ethernet + IPv4 + UDP headers
fn ethernet_frame(dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut data = vec![0u8; 14];
    data[12] = 0x08;

    let mut ip = [0u8; 20];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&((28 + payload.len()) as u16).to_be_bytes());
    ip[9] = 17;
    data.extend_from_slice(&ip);

    data.extend_from_slice(&5000u16.to_be_bytes());
    data.extend_from_slice(&dst_port.to_be_bytes());
    data.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    data.extend_from_slice(&[0, 0]);
    data.extend_from_slice(payload);
    data
}

#[test]
fn test_replay_pcap_file_with_loss() {
    let path = std::env::temp_dir().join(format!("samplebuilder-replay-{}.pcap", std::process::id()));
    {
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = PcapWriter::new(file).unwrap();
        for frame in 0..8u16 {
            for (i, packet) in vp8_frame(frame).iter().enumerate() {
                // frame 4 loses its second half
                if frame == 4 && i == 1 {
                    continue;
                }
                let data = ethernet_frame(5004, &packet.to_bytes());
                let ts = Duration::from_millis(frame as u64 * 33 + i as u64);
                writer.write_packet(&PcapPacket::new(ts, data.len() as u32, &data)).unwrap();
            }
        }
    }

    let packets = replay::load_pcap(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(packets.len(), 15);

    let mut builder = rtp::builder_for(&vp8_config()).unwrap();
    let summary = replay::replay(&packets, &mut builder, Some(5004));

    let frames: Vec<Vec<u8>> = summary.samples.iter().map(|(s, _)| s.data.to_vec()).collect();
    let expected: Vec<Vec<u8>> = [0u16, 1, 2, 3, 5, 6, 7].into_iter().map(expected_frame).collect();
    assert_eq!(frames, expected);
    assert_eq!(summary.stats.packets_lost, 1);
    assert_eq!(summary.stats.resyncs, 1);
    assert_eq!(summary.stats.packets_discarded, 1);
}

#[test]
fn test_load_pcap_missing_file() {
    let err = replay::load_pcap("/nonexistent/capture.pcap").unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to open pcap file"));
}
