use anyhow::{Context, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use samplebuilder::cli::{self, Args};
use samplebuilder::config::Config;
use samplebuilder::rtp::{self, replay, RtpReceiver, Sample};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse_args();

    if args.help {
        cli::print_help();
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("samplebuilder=info".parse().unwrap()),
        )
        .init();

    info!("samplebuilder v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  Codec: {} @ {} Hz", config.codec, config.sample_rate);
    info!("  Max late: {} packets", config.max_late);

    if args.validate {
        info!("Validating configuration...");
        match config.validate() {
            Ok(()) => {
                info!("Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate()?;

    if let Some(path) = args.replay.clone() {
        return run_replay(&config, &args, &path);
    }

    if !args.listen {
        info!("No mode given, defaulting to --listen");
    }
    run_listen(&config, &args).await
}

fn run_replay(config: &Config, args: &Args, path: &str) -> Result<()> {
    info!("Replaying {}", path);
    let packets = replay::load_pcap(path)?;
    let mut builder = rtp::builder_for(config)?;
    let summary = replay::replay(&packets, &mut builder, args.port);

    if summary.stats.packets_lost > 0 {
        warn!("{} packets never arrived", summary.stats.packets_lost);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_samples(&summary.samples);
        info!(
            "Replay done: {} packets in, {} samples out",
            summary.packets_replayed, summary.samples_emitted
        );
    }
    Ok(())
}

async fn run_listen(config: &Config, args: &Args) -> Result<()> {
    let port = args.port.unwrap_or(config.rtp_port);
    let builder = rtp::builder_for(config)?;
    let receiver = RtpReceiver::bind(port, builder)
        .await?
        .with_payload_type(config.payload_type);
    info!("Listening on UDP port {} for {}s", receiver.local_port()?, config.listen_duration_secs);

    let cancel_token = CancellationToken::new();
    let shutdown = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    let summary = receiver
        .receive_for_cancellable(Duration::from_secs(config.listen_duration_secs), cancel_token)
        .await
        .context("RTP receive failed")?;

    if summary.datagrams == 0 {
        warn!("No RTP packets received");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_samples(&summary.samples);
    }
    Ok(())
}

fn print_samples(samples: &[(Sample, u32)]) {
    for (sample, timestamp) in samples {
        println!(
            "ts={:<10} bytes={:<6} duration={:?}",
            timestamp,
            sample.data.len(),
            sample.duration
        );
    }
}
