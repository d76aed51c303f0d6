//! Command-line argument parsing for the samplebuilder tool

/// Parse command line arguments
#[derive(Debug, Default)]
pub struct Args {
    /// Receive RTP on a UDP port
    pub listen: bool,
    /// Reassemble the RTP packets in this pcap file
    pub replay: Option<String>,
    /// Overrides RTP_PORT for --listen, filters by destination port for --replay
    pub port: Option<u16>,
    pub json: bool,
    pub validate: bool,
    pub help: bool,
}

pub fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from(&args)
}

/// Parse from an explicit argv (first element is the program name)
pub fn parse_args_from(args: &[String]) -> Args {
    let mut result = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--listen" => result.listen = true,
            "--replay" => {
                if i + 1 < args.len() {
                    i += 1;
                    result.replay = Some(args[i].clone());
                }
            }
            "--port" => {
                if i + 1 < args.len() {
                    i += 1;
                    result.port = args[i].parse().ok();
                }
            }
            "--json" => result.json = true,
            "--validate" => result.validate = true,
            "--help" | "-h" => result.help = true,
            _ => {}
        }
        i += 1;
    }

    result
}

pub fn print_help() {
    println!("samplebuilder - RTP frame reassembly\n");
    println!("USAGE:");
    println!("    samplebuilder [OPTIONS]\n");
    println!("OPTIONS:");
    println!("    --listen            Receive RTP over UDP for LISTEN_DURATION_SECS (default mode)");
    println!("    --replay FILE       Reassemble the RTP packets captured in a pcap file");
    println!("    --port N            UDP port to listen on, or destination port to replay");
    println!("    --json              Print the session summary as JSON");
    println!("    --validate          Validate configuration and exit");
    println!("    --help, -h          Show this help message\n");
    println!("ENVIRONMENT:");
    println!("    SAMPLEBUILDER_MAX_LATE      Packets to wait for a missing one (default 50)");
    println!("    SAMPLEBUILDER_SAMPLE_RATE   RTP clock rate in Hz (default 90000)");
    println!("    SAMPLEBUILDER_CODEC         raw or vp8 (default raw)");
    println!("    RTP_PORT                    UDP port for --listen (default 5004)");
    println!("    LISTEN_DURATION_SECS        How long --listen runs (default 10)");
    println!("    RTP_PAYLOAD_TYPE            Only reassemble this payload type");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("samplebuilder")
            .chain(args.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_args_default() {
        let result = parse_args_from(&argv(&[]));
        assert!(!result.listen);
        assert!(result.replay.is_none());
        assert!(result.port.is_none());
        assert!(!result.json);
        assert!(!result.validate);
        assert!(!result.help);
    }

    #[test]
    fn test_parse_args_listen_with_port() {
        let result = parse_args_from(&argv(&["--listen", "--port", "6000"]));
        assert!(result.listen);
        assert_eq!(result.port, Some(6000));
    }

    #[test]
    fn test_parse_args_replay() {
        let result = parse_args_from(&argv(&["--replay", "call.pcap", "--json"]));
        assert_eq!(result.replay, Some("call.pcap".to_string()));
        assert!(result.json);
    }

    #[test]
    fn test_parse_args_missing_values() {
        let result = parse_args_from(&argv(&["--replay"]));
        assert!(result.replay.is_none());

        let result = parse_args_from(&argv(&["--port", "not-a-port"]));
        assert!(result.port.is_none());
    }

    #[test]
    fn test_parse_args_validate_and_help() {
        assert!(parse_args_from(&argv(&["--validate"])).validate);
        assert!(parse_args_from(&argv(&["--help"])).help);
        assert!(parse_args_from(&argv(&["-h"])).help);
    }

    #[test]
    fn test_parse_args_ignores_unknown() {
        let result = parse_args_from(&argv(&["--verbose", "--listen"]));
        assert!(result.listen);
    }
}
