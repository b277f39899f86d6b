//! Error types for gale-core
//!
//! Only setup failures and multiplexer wait failures are errors. Anything that
//! goes wrong on a single connection is handled by closing that connection.

use std::net::SocketAddr;

use thiserror::Error;

/// Result type alias for gale operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the gale server
#[derive(Debug, Error)]
pub enum Error {
    /// Listening socket could not be created or configured
    #[error("socket setup failed: {0}")]
    Socket(#[source] std::io::Error),

    /// Address in use, or insufficient privileges
    #[error("bind to {addr} failed: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// listen(2) failed
    #[error("listen on {addr} failed: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Readiness multiplexer could not be created
    #[error("failed to create readiness multiplexer: {0}")]
    Poller(#[source] std::io::Error),

    /// Listening socket could not be registered with the multiplexer
    #[error("failed to register listener: {0}")]
    Register(#[source] std::io::Error),

    /// Multiplexer wait failed; no further progress is possible
    #[error("readiness wait failed: {0}")]
    Wait(#[source] std::io::Error),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error happened before the server started serving
    pub fn is_setup(&self) -> bool {
        !matches!(self, Error::Wait(_))
    }
}
