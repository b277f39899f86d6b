//! Listening socket setup

use std::net::{SocketAddr, TcpListener};

use socket2::{Domain, Protocol, Socket, Type};

use crate::{Error, Result};

/// Create a bound, listening, non-blocking TCP socket.
///
/// Every failure here is fatal: the caller must not start serving.
pub fn bind_listener(addr: SocketAddr, backlog: i32) -> Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(Error::Socket)?;

    // SO_REUSEADDR - allow binding to address in TIME_WAIT
    socket.set_reuse_address(true).map_err(Error::Socket)?;

    // SO_REUSEPORT - where the platform has it
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true).map_err(Error::Socket)?;

    socket.set_nonblocking(true).map_err(Error::Socket)?;

    socket
        .bind(&addr.into())
        .map_err(|source| Error::Bind { addr, source })?;

    socket
        .listen(backlog)
        .map_err(|source| Error::Listen { addr, source })?;

    Ok(socket.into())
}
