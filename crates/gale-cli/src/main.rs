//! gale: fixed-response HTTP/1.1 server
//!
//! ```text
//! gale [PORT] [--host ADDR] [--single-shot] [--carry] [--log-format pretty|compact|json]
//! ```

mod cli;
mod logging;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use gale_core::{Server, ServerConfig};
use tracing::{error, info, warn};

use crate::cli::Args;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = logging::init(args.log_format) {
        eprintln!("Warning: {e:#}");
    }

    let (config, port_warning) = args.into_config();
    if let Some(message) = port_warning {
        warn!("{message}");
    }

    match serve(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let mut server = Server::bind(config).context("server setup failed")?;

    info!(
        "gale listening on {} using {} ({} connections), press Ctrl+C to stop",
        server.local_addr(),
        server.backend(),
        server.config().mode.as_str()
    );

    let stats = server.stats();
    let result = server.run().context("event loop aborted");
    info!(stats = ?stats.snapshot(), "shutting down");
    result
}
