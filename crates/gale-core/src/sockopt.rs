//! Per-connection socket tuning

use std::io;
use std::net::TcpStream;
#[cfg(any(target_os = "linux", target_os = "android"))]
use std::os::fd::AsRawFd;

use socket2::SockRef;

/// Prepare an accepted socket for the event loop.
///
/// Non-blocking mode is mandatory and its failure is returned. The rest are
/// performance options applied best-effort: TCP_NODELAY, SO_RCVBUF/SO_SNDBUF,
/// SO_NOSIGPIPE and TCP_QUICKACK where the platform has them.
pub fn configure_stream(stream: &TcpStream, buffer_size: usize) -> io::Result<()> {
    stream.set_nonblocking(true)?;

    let sock = SockRef::from(stream);

    if let Err(e) = sock.set_nodelay(true) {
        tracing::trace!(error = %e, "TCP_NODELAY not applied");
    }
    if let Err(e) = sock.set_recv_buffer_size(buffer_size) {
        tracing::trace!(error = %e, "SO_RCVBUF not applied");
    }
    if let Err(e) = sock.set_send_buffer_size(buffer_size) {
        tracing::trace!(error = %e, "SO_SNDBUF not applied");
    }

    #[cfg(target_vendor = "apple")]
    if let Err(e) = sock.set_nosigpipe(true) {
        tracing::trace!(error = %e, "SO_NOSIGPIPE not applied");
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    if let Err(e) = set_quickack(stream.as_raw_fd()) {
        tracing::trace!(error = %e, "TCP_QUICKACK not applied");
    }

    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_quickack(fd: std::os::fd::RawFd) -> io::Result<()> {
    let on: libc::c_int = 1;
    syscall!(setsockopt(
        fd,
        libc::IPPROTO_TCP,
        libc::TCP_QUICKACK,
        &on as *const libc::c_int as *const libc::c_void,
        std::mem::size_of::<libc::c_int>() as libc::socklen_t
    ))?;
    Ok(())
}
