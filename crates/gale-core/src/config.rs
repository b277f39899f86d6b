//! Server configuration
//!
//! Defaults come from [`ServerConfig::default`]. [`ServerConfig::from_env`]
//! overlays `GALE_*` environment variables:
//!
//! | Variable | Values | Default |
//! |---|---|---|
//! | `GALE_HOST` | IP address | `0.0.0.0` |
//! | `GALE_BACKLOG` | integer >= 1024 | `2048` |
//! | `GALE_MODE` | `persistent`, `single-shot` | `persistent` |
//! | `GALE_FRAMING` | `per-read`, `carry` | `per-read` |
//! | `GALE_READ_BUFFER` | bytes | `4096` |
//!
//! Unparseable values keep the default and are logged as warnings.

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use bytes::Bytes;

use crate::{Error, Result};

/// Port used when none is given or the given one is invalid
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BACKLOG: i32 = 2048;
/// Smallest accepted backlog
pub const MIN_BACKLOG: i32 = 1024;
pub const DEFAULT_MAX_EVENTS: usize = 1024;
pub const DEFAULT_READ_BUFFER: usize = 4096;
/// SO_RCVBUF / SO_SNDBUF applied to every accepted connection
pub const DEFAULT_SOCKET_BUFFER: usize = 64 * 1024;

/// Whether a connection survives its first response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionMode {
    /// `Connection: keep-alive`, any number of requests per connection
    #[default]
    Persistent,
    /// `Connection: close`, closed after the first response
    SingleShot,
}

impl ConnectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionMode::Persistent => "persistent",
            ConnectionMode::SingleShot => "single-shot",
        }
    }
}

impl FromStr for ConnectionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "persistent" | "keep-alive" => Ok(ConnectionMode::Persistent),
            "single-shot" | "close" => Ok(ConnectionMode::SingleShot),
            _ => Err(Error::Config(format!("unknown connection mode: {s}"))),
        }
    }
}

/// How request boundaries are tracked across reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramingMode {
    /// Boundaries are found within each read only; residual bytes are dropped
    #[default]
    PerRead,
    /// Residual bytes are kept per connection until the next read
    Carry,
}

impl FramingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FramingMode::PerRead => "per-read",
            FramingMode::Carry => "carry",
        }
    }
}

impl FromStr for FramingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "per-read" => Ok(FramingMode::PerRead),
            "carry" => Ok(FramingMode::Carry),
            _ => Err(Error::Config(format!("unknown framing mode: {s}"))),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    /// 0 binds an ephemeral port
    pub port: u16,
    pub backlog: i32,
    pub mode: ConnectionMode,
    pub framing: FramingMode,
    /// Scratch buffer size for each recv
    pub read_buffer_size: usize,
    pub socket_buffer_size: usize,
    /// Readiness events collected per wait
    pub max_events: usize,
    /// Max residual bytes per connection in [`FramingMode::Carry`]
    pub carry_limit: usize,
    /// Raw bytes sent instead of the built-in response
    pub response: Option<Bytes>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            mode: ConnectionMode::default(),
            framing: FramingMode::default(),
            read_buffer_size: DEFAULT_READ_BUFFER,
            socket_buffer_size: DEFAULT_SOCKET_BUFFER,
            max_events: DEFAULT_MAX_EVENTS,
            carry_limit: gale_framer::DEFAULT_CARRY_LIMIT,
            response: None,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `GALE_*` environment variables
    pub fn from_env() -> Self {
        Self::default().overlay(|key| env::var(key).ok())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "ignoring unparseable environment value");
                    None
                }
            }
        }

        if let Some(host) = parsed(&lookup, "GALE_HOST") {
            self.host = host;
        }
        if let Some(backlog) = parsed(&lookup, "GALE_BACKLOG") {
            self.backlog = backlog;
        }
        if let Some(mode) = parsed(&lookup, "GALE_MODE") {
            self.mode = mode;
        }
        if let Some(framing) = parsed(&lookup, "GALE_FRAMING") {
            self.framing = framing;
        }
        if let Some(size) = parsed(&lookup, "GALE_READ_BUFFER") {
            self.read_buffer_size = size;
        }
        self
    }

    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_mode(mut self, mode: ConnectionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_framing(mut self, framing: FramingMode) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_carry_limit(mut self, limit: usize) -> Self {
        self.carry_limit = limit;
        self
    }

    pub fn with_response(mut self, response: impl Into<Bytes>) -> Self {
        self.response = Some(response.into());
        self
    }

    /// Address the listener binds to
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backlog < MIN_BACKLOG {
            return Err(Error::Config(format!(
                "backlog {} is below the minimum of {MIN_BACKLOG}",
                self.backlog
            )));
        }
        if self.read_buffer_size == 0 {
            return Err(Error::Config("read buffer size must be non-zero".into()));
        }
        if self.socket_buffer_size == 0 {
            return Err(Error::Config("socket buffer size must be non-zero".into()));
        }
        if self.max_events == 0 {
            return Err(Error::Config("max events must be non-zero".into()));
        }
        if self.framing == FramingMode::Carry && self.carry_limit == 0 {
            return Err(Error::Config("carry limit must be non-zero".into()));
        }
        if matches!(&self.response, Some(raw) if raw.is_empty()) {
            return Err(Error::Config("response override is empty".into()));
        }
        Ok(())
    }
}

/// Outcome of resolving a user-supplied port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortChoice {
    pub port: u16,
    /// Set when the input was rejected and the default substituted
    pub warning: Option<String>,
}

/// Validate a port argument to 1..=65535, falling back to [`DEFAULT_PORT`].
///
/// Never fails: invalid input yields the default plus a warning.
pub fn resolve_port(arg: Option<&str>) -> PortChoice {
    let Some(raw) = arg else {
        return PortChoice {
            port: DEFAULT_PORT,
            warning: None,
        };
    };

    match raw.trim().parse::<u32>() {
        Ok(port @ 1..=65535) => PortChoice {
            port: port as u16,
            warning: None,
        },
        _ => PortChoice {
            port: DEFAULT_PORT,
            warning: Some(format!(
                "invalid port number {raw:?}, using default: {DEFAULT_PORT}"
            )),
        },
    }
}
