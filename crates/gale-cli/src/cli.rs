//! Command-line arguments

use std::net::IpAddr;

use clap::Parser;
use gale_core::{resolve_port, ConnectionMode, FramingMode, ServerConfig};

use crate::logging::LogFormat;

#[derive(Debug, Parser)]
#[command(name = "gale", version, about = "Answers every HTTP request with a fixed 200 OK")]
pub struct Args {
    /// Port to listen on (1-65535). Invalid values fall back to 8080.
    #[arg(allow_hyphen_values = true)]
    pub port: Option<String>,

    /// Address to bind (overrides GALE_HOST)
    #[arg(long)]
    pub host: Option<IpAddr>,

    /// Close each connection after its first response
    #[arg(long)]
    pub single_shot: bool,

    /// Keep partial requests between reads
    #[arg(long)]
    pub carry: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, env = "GALE_LOG_FORMAT")]
    pub log_format: LogFormat,
}

impl Args {
    /// Environment defaults with flags applied on top. The second value is
    /// a warning for a rejected port argument.
    pub fn into_config(self) -> (ServerConfig, Option<String>) {
        self.apply(ServerConfig::from_env())
    }

    fn apply(self, mut config: ServerConfig) -> (ServerConfig, Option<String>) {
        let port = resolve_port(self.port.as_deref());
        config.port = port.port;

        if let Some(host) = self.host {
            config.host = host;
        }
        if self.single_shot {
            config.mode = ConnectionMode::SingleShot;
        }
        if self.carry {
            config.framing = FramingMode::Carry;
        }
        (config, port.warning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gale_core::DEFAULT_PORT;

    fn parse(argv: &[&str]) -> (ServerConfig, Option<String>) {
        Args::try_parse_from(argv).unwrap().apply(ServerConfig::default())
    }

    #[test]
    fn test_defaults() {
        let (config, warning) = parse(&["gale"]);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.mode, ConnectionMode::Persistent);
        assert_eq!(config.framing, FramingMode::PerRead);
        assert!(warning.is_none());
    }

    #[test]
    fn test_flags() {
        let (config, _) = parse(&["gale", "9000", "--single-shot", "--carry", "--host", "127.0.0.1"]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.mode, ConnectionMode::SingleShot);
        assert_eq!(config.framing, FramingMode::Carry);
        assert_eq!(config.host.to_string(), "127.0.0.1");
    }

    #[test]
    fn test_invalid_port_falls_back() {
        for bad in ["0", "70000", "abc"] {
            let (config, warning) = parse(&["gale", bad]);
            assert_eq!(config.port, DEFAULT_PORT);
            assert!(warning.unwrap().contains("8080"));
        }
    }

    #[test]
    fn test_log_format() {
        let args = Args::try_parse_from(["gale", "--log-format", "json"]).unwrap();
        assert_eq!(args.log_format, LogFormat::Json);
    }
}
