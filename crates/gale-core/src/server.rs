//! Event loop
//!
//! [`Server`] is the single owned context for the process: listening socket,
//! readiness multiplexer, connection table, and the pre-rendered response.
//! It runs on one thread and every socket it touches is non-blocking.

use std::io;
use std::mem;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use gale_framer::ScanBuffer;
use tracing::{debug, info, trace, warn};

use crate::config::{FramingMode, ServerConfig};
use crate::connection::{CloseReason, Connection, ConnectionTable, Progress};
use crate::io::{accept, AcceptOutcome};
use crate::listener::bind_listener;
use crate::poller::{DefaultPoller, Event, Events, Interest, Poller};
use crate::response::render;
use crate::sockopt::configure_stream;
use crate::stats::ServerStats;
use crate::{Error, Result};

pub struct Server<P: Poller = DefaultPoller> {
    config: ServerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    poller: P,
    events: Events,
    connections: ConnectionTable,
    /// Pre-rendered response shared by every connection
    payload: Bytes,
    scratch: Vec<u8>,
    stats: Arc<ServerStats>,
}

impl Server<DefaultPoller> {
    /// Perform all fatal setup: listener, multiplexer, listener registration.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let poller = DefaultPoller::new().map_err(Error::Poller)?;
        Self::with_poller(config, poller)
    }
}

impl<P: Poller> Server<P> {
    pub fn with_poller(config: ServerConfig, mut poller: P) -> Result<Self> {
        config.validate()?;

        let listener = bind_listener(config.addr(), config.backlog)?;
        let local_addr = listener.local_addr()?;
        poller
            .register(listener.as_raw_fd(), Interest::Readable)
            .map_err(Error::Register)?;
        let payload = render(&config);

        info!(
            addr = %local_addr,
            backend = poller.name(),
            mode = config.mode.as_str(),
            framing = config.framing.as_str(),
            "listening"
        );

        Ok(Self {
            events: Events::with_capacity(config.max_events),
            scratch: vec![0; config.read_buffer_size],
            config,
            listener,
            local_addr,
            poller,
            connections: ConnectionTable::new(),
            payload,
            stats: Arc::new(ServerStats::new()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Name of the readiness backend
    pub fn backend(&self) -> &'static str {
        self.poller.name()
    }

    /// Shared counters, readable from other threads
    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    /// Serve forever. Returns only when the multiplexer itself fails.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.turn(None)?;
        }
    }

    /// Wait for one batch of readiness events and handle it, in the order
    /// the multiplexer reported them. Returns the number of events.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<usize> {
        let mut events = mem::replace(&mut self.events, Events::with_capacity(0));
        if let Err(e) = self.poller.wait(&mut events, timeout) {
            self.events = events;
            return Err(Error::Wait(e));
        }

        for event in &events {
            self.dispatch(*event);
        }

        let handled = events.len();
        self.events = events;
        Ok(handled)
    }

    fn dispatch(&mut self, event: Event) {
        if event.fd == self.listener.as_raw_fd() {
            self.accept_pending();
            return;
        }

        let Some(conn) = self.connections.get_mut(event.fd) else {
            trace!(fd = event.fd, "event for closed descriptor");
            return;
        };

        // Hangup and error flags route through whichever path surfaces them:
        // a send when output is pending, otherwise a read.
        let progress = if conn.is_backlogged() && (event.writable || event.closed) {
            conn.on_writable(&mut self.scratch, &self.stats)
        } else if event.readable || event.closed {
            conn.on_readable(&mut self.scratch, &self.stats)
        } else {
            return;
        };

        match progress {
            Progress::Idle => self.set_write_interest(event.fd, false),
            Progress::Backlogged => self.set_write_interest(event.fd, true),
            Progress::Close(reason) => self.close(event.fd, reason),
        }
    }

    /// Arm write readiness while a connection has unsent output and disarm it
    /// once the backlog clears.
    fn set_write_interest(&mut self, fd: RawFd, armed: bool) {
        let Some(conn) = self.connections.get_mut(fd) else {
            return;
        };
        if conn.write_armed() == armed {
            return;
        }

        let interest = if armed {
            Interest::ReadWrite
        } else {
            Interest::Readable
        };
        match self.poller.reregister(fd, interest) {
            Ok(()) => {
                conn.set_write_armed(armed);
                trace!(fd, armed, pending = conn.pending(), "write interest");
            }
            Err(e) => self.close(fd, CloseReason::InterestFailed(e)),
        }
    }

    /// Accept until the backlog is drained. Stopping early would lose the
    /// edge for connections that queued after the last accept.
    fn accept_pending(&mut self) {
        loop {
            match accept(&self.listener) {
                AcceptOutcome::Accepted(stream, peer) => self.admit(stream, peer),
                AcceptOutcome::WouldBlock => return,
                AcceptOutcome::Failed(e) => {
                    self.stats.record_accept_error();
                    warn!(error = %e, "accept failed");
                    if !is_transient_accept_error(&e) {
                        return;
                    }
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        let fd = stream.as_raw_fd();

        if let Err(e) = configure_stream(&stream, self.config.socket_buffer_size) {
            warn!(fd, %peer, error = %e, "dropping connection: socket setup failed");
            return;
        }
        if let Err(e) = self.poller.register(fd, Interest::Readable) {
            warn!(fd, %peer, error = %e, "dropping connection: registration failed");
            return;
        }

        let scan = match self.config.framing {
            FramingMode::PerRead => None,
            FramingMode::Carry => Some(ScanBuffer::with_limit(self.config.carry_limit)),
        };
        let mode = self.config.mode;
        self.connections
            .insert(Connection::new(stream, peer, self.payload.clone(), mode, scan));
        self.stats.record_accept();
        debug!(fd, %peer, "accepted");
    }

    /// Deregister and close a connection. A descriptor that is no longer in
    /// the table is left alone.
    pub fn close(&mut self, fd: RawFd, reason: CloseReason) {
        let Some(mut conn) = self.connections.remove(fd) else {
            return;
        };
        conn.mark_closing();

        if let Err(e) = self.poller.deregister(fd) {
            warn!(fd, error = %e, "deregister failed");
        }

        if reason.is_graceful() {
            debug!(fd, peer = %conn.peer(), responses = conn.responses(), %reason, "closed");
        } else {
            warn!(fd, peer = %conn.peer(), responses = conn.responses(), %reason, "closed");
        }

        // Dropping the connection closes the socket, after deregistration.
        drop(conn);
        self.stats.record_close();
    }
}

fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::Ipv4Addr;

    fn local() -> ServerConfig {
        ServerConfig::default()
            .with_host(Ipv4Addr::LOCALHOST.into())
            .with_port(0)
    }

    /// Turn the loop until `done` holds or a few seconds pass.
    fn pump(server: &mut Server, mut done: impl FnMut(&Server) -> bool) {
        for _ in 0..100 {
            if done(server) {
                return;
            }
            server.turn(Some(Duration::from_millis(50))).unwrap();
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_accept_respond_close() {
        let mut server = Server::bind(local()).unwrap();
        let mut client = TcpStream::connect(server.local_addr()).unwrap();

        pump(&mut server, |s| s.connections().len() == 1);

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        pump(&mut server, |s| s.stats().responses() == 1);

        let mut buf = vec![0u8; 256];
        let n = client.read(&mut buf).unwrap();
        assert!(buf[..n].ends_with(b"\r\n\r\nOK"));

        drop(client);
        pump(&mut server, |s| s.connections().is_empty());
        assert_eq!(server.stats().closed(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut server = Server::bind(local()).unwrap();
        let _client = TcpStream::connect(server.local_addr()).unwrap();
        pump(&mut server, |s| s.connections().len() == 1);

        let fd = server.connections().fds().next().unwrap();
        server.close(fd, CloseReason::Done);
        server.close(fd, CloseReason::Done);

        assert!(server.connections().is_empty());
        assert_eq!(server.stats().closed(), 1);
    }

    #[test]
    fn test_event_for_closed_descriptor_is_ignored() {
        let mut server = Server::bind(local()).unwrap();
        let mut client = TcpStream::connect(server.local_addr()).unwrap();
        pump(&mut server, |s| s.connections().len() == 1);

        let fd = server.connections().fds().next().unwrap();
        server.close(fd, CloseReason::Done);

        // The client's data would be answered if the stale event reached a socket.
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let stale = |readable, writable, closed| Event {
            fd,
            readable,
            writable,
            closed,
        };
        server.dispatch(stale(true, false, false));
        server.dispatch(stale(false, true, false));
        server.dispatch(stale(true, true, true));

        assert!(server.connections().is_empty());
        assert_eq!(server.stats().closed(), 1);
        assert_eq!(server.stats().responses(), 0);
    }

    #[test]
    fn test_backlogged_connection_does_not_stall_others() {
        let payload = vec![b'x'; 4 * 1024 * 1024];
        let mut server = Server::bind(local().with_response(payload.clone())).unwrap();
        let mut hog = TcpStream::connect(server.local_addr()).unwrap();
        let mut other = TcpStream::connect(server.local_addr()).unwrap();
        pump(&mut server, |s| s.connections().len() == 2);

        hog.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        pump(&mut server, |s| s.connections().backlogged() == 1);

        other.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        other.set_nonblocking(true).unwrap();
        let mut received = 0;
        let mut buf = vec![0u8; 64 * 1024];
        pump(&mut server, |_| {
            while let Ok(n) = other.read(&mut buf) {
                if n == 0 {
                    break;
                }
                received += n;
            }
            received == payload.len()
        });

        assert_eq!(server.stats().responses(), 1);
        assert_eq!(server.connections().backlogged(), 1);
        drop(hog);
    }

    struct BrokenPoller;

    impl Poller for BrokenPoller {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn register(&mut self, _fd: RawFd, _interest: Interest) -> io::Result<()> {
            Ok(())
        }

        fn reregister(&mut self, _fd: RawFd, _interest: Interest) -> io::Result<()> {
            Ok(())
        }

        fn deregister(&mut self, _fd: RawFd) -> io::Result<()> {
            Ok(())
        }

        fn wait(&mut self, _events: &mut Events, _timeout: Option<Duration>) -> io::Result<()> {
            Err(io::Error::from_raw_os_error(libc::EBADF))
        }
    }

    #[test]
    fn test_wait_failure_ends_run() {
        let mut server = Server::with_poller(local(), BrokenPoller).unwrap();
        assert_eq!(server.backend(), "broken");
        match server.run() {
            Err(Error::Wait(e)) => assert_eq!(e.raw_os_error(), Some(libc::EBADF)),
            other => panic!("expected wait failure, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let config = local().with_backlog(1);
        assert!(matches!(Server::bind(config), Err(Error::Config(_))));
    }
}
