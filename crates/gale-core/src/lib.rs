//! gale-core: single-threaded, edge-triggered TCP responder
//!
//! Accepts many concurrent connections on one thread, frames HTTP/1.x
//! requests by their header terminator and answers each with one fixed,
//! pre-rendered response. Supports keep-alive and pipelining.
//!
//! ## Components
//! - [`listener`] - bound, non-blocking listening socket
//! - [`poller`] - readiness multiplexer (epoll or kqueue)
//! - [`connection`] - connection table and per-connection read path
//! - [`writer`] - non-blocking response writer and per-connection backlog
//! - [`server`] - the event loop tying them together
//!
//! ## Example
//! ```no_run
//! use gale_core::{Server, ServerConfig};
//!
//! let mut server = Server::bind(ServerConfig::default().with_port(8080))?;
//! server.run()?;
//! # Ok::<(), gale_core::Error>(())
//! ```

#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
compile_error!("gale requires epoll (Linux) or kqueue (BSD/macOS)");

/// Call a libc function, mapping `-1` to `io::Error::last_os_error()`.
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)? ) ) => {{
        #[allow(unused_unsafe)]
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

pub mod config;
pub mod connection;
pub mod error;
pub mod io;
pub mod listener;
pub mod poller;
pub mod response;
pub mod server;
pub mod sockopt;
pub mod stats;
pub mod writer;

// Re-exports
pub use config::{resolve_port, ConnectionMode, FramingMode, PortChoice, ServerConfig, DEFAULT_PORT};
pub use connection::{CloseReason, ConnState, Connection, ConnectionTable, Progress};
pub use error::{Error, Result};
pub use poller::{DefaultPoller, Event, Events, Interest, Poller};
pub use response::{Response, ResponseBuilder, StatusCode};
pub use server::Server;
pub use stats::{ServerStats, StatsSnapshot};
pub use writer::{write_response, Flush, Outbox, Sink, WriteOutcome};
