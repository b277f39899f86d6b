//! Client connections and the table that owns them
//!
//! A [`Connection`] owns its socket, so removing it from the
//! [`ConnectionTable`] and dropping it is the one and only close. Nothing can
//! reach a socket after its close because nothing else holds it.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::ops::ControlFlow;
use std::os::fd::{AsRawFd, RawFd};

use bytes::Bytes;
use gale_framer::{CapacityExceeded, ScanBuffer};

use crate::config::ConnectionMode;
use crate::io::{recv, RecvOutcome};
use crate::stats::ServerStats;
use crate::writer::{Flush, Outbox};

/// Lifecycle of a connection. `Closed` is represented by absence from the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accepted and registered, no data seen yet
    Registered,
    Reading,
    /// Output backlogged; reads are paused until it drains
    Responding,
    Closing,
}

/// Why a connection is being closed
#[derive(Debug)]
pub enum CloseReason {
    /// Peer closed its side
    Eof,
    ReadFailed(io::Error),
    WriteFailed(io::Error),
    /// Write interest could not be changed
    InterestFailed(io::Error),
    /// Incomplete request outgrew the carry buffer
    CarryOverflow(CapacityExceeded),
    /// Single-shot connection answered its request
    Done,
}

impl CloseReason {
    /// Orderly closes, as opposed to failures
    pub fn is_graceful(&self) -> bool {
        matches!(self, CloseReason::Eof | CloseReason::Done)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Eof => f.write_str("peer closed"),
            CloseReason::ReadFailed(e) => write!(f, "read failed: {e}"),
            CloseReason::WriteFailed(e) => write!(f, "write failed: {e}"),
            CloseReason::InterestFailed(e) => write!(f, "poller update failed: {e}"),
            CloseReason::CarryOverflow(e) => write!(f, "{e}"),
            CloseReason::Done => f.write_str("response complete"),
        }
    }
}

/// Where a connection stands after handling a readiness event
#[derive(Debug)]
pub enum Progress {
    /// Input drained to would-block and every response sent
    Idle,
    /// Send buffer full; resume on write readiness
    Backlogged,
    Close(CloseReason),
}

#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    mode: ConnectionMode,
    state: ConnState,
    responses: u64,
    outbox: Outbox,
    /// Single-shot connection whose one response is queued
    finishing: bool,
    /// Write interest currently armed in the poller
    write_armed: bool,
    /// Present only when residual bytes are carried between reads
    scan: Option<ScanBuffer>,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        payload: Bytes,
        mode: ConnectionMode,
        scan: Option<ScanBuffer>,
    ) -> Self {
        Self {
            stream,
            peer,
            mode,
            state: ConnState::Registered,
            responses: 0,
            outbox: Outbox::new(payload),
            finishing: false,
            write_armed: false,
            scan,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Responses fully handed to the kernel
    pub fn responses(&self) -> u64 {
        self.responses
    }

    /// Responses framed but not yet fully sent
    pub fn pending(&self) -> u64 {
        self.outbox.pending()
    }

    pub fn is_backlogged(&self) -> bool {
        !self.outbox.is_empty()
    }

    pub(crate) fn write_armed(&self) -> bool {
        self.write_armed
    }

    pub(crate) fn set_write_armed(&mut self, armed: bool) {
        self.write_armed = armed;
    }

    pub(crate) fn mark_closing(&mut self) {
        self.state = ConnState::Closing;
    }

    /// Drain the socket after a read readiness notification.
    ///
    /// Reads until would-block, answering every complete request on the way.
    /// While output is backlogged nothing is read: unread input stays in the
    /// kernel and is picked up by [`Connection::on_writable`] once the
    /// backlog clears.
    pub fn on_readable(&mut self, scratch: &mut [u8], stats: &ServerStats) -> Progress {
        if self.is_backlogged() {
            return Progress::Backlogged;
        }

        self.state = ConnState::Reading;
        loop {
            match recv(&mut self.stream, scratch) {
                RecvOutcome::Data(n) => {
                    tracing::trace!(fd = self.fd(), bytes = n, "read");
                    if let Err(reason) = self.frame(&scratch[..n]) {
                        return Progress::Close(reason);
                    }
                    match self.flush(stats) {
                        Progress::Idle => self.state = ConnState::Reading,
                        other => return other,
                    }
                }
                RecvOutcome::WouldBlock => return Progress::Idle,
                RecvOutcome::Eof => return Progress::Close(CloseReason::Eof),
                RecvOutcome::Failed(e) => return Progress::Close(CloseReason::ReadFailed(e)),
            }
        }
    }

    /// Continue a backlogged write after a write readiness notification.
    ///
    /// Once the backlog drains, input that arrived meanwhile is read, since
    /// its edge was consumed while reads were paused.
    pub fn on_writable(&mut self, scratch: &mut [u8], stats: &ServerStats) -> Progress {
        if !self.is_backlogged() {
            return Progress::Idle;
        }
        match self.flush(stats) {
            Progress::Idle => self.on_readable(scratch, stats),
            other => other,
        }
    }

    fn flush(&mut self, stats: &ServerStats) -> Progress {
        let (completed, blocked) = match self.outbox.flush(&mut self.stream) {
            Flush::Drained { completed } => (completed, false),
            Flush::Blocked { completed } => (completed, true),
            Flush::Failed(e) => return Progress::Close(CloseReason::WriteFailed(e)),
        };

        self.responses += completed;
        for _ in 0..completed {
            stats.record_response();
        }

        if blocked {
            self.state = ConnState::Responding;
            tracing::trace!(fd = self.fd(), pending = self.pending(), "send buffer full");
            Progress::Backlogged
        } else if self.finishing {
            Progress::Close(CloseReason::Done)
        } else {
            Progress::Idle
        }
    }

    /// Queue one response per complete request in `chunk`, left to right.
    fn frame(&mut self, chunk: &[u8]) -> Result<(), CloseReason> {
        let Connection {
            mode,
            outbox,
            finishing,
            scan,
            ..
        } = self;

        // A single-shot connection answers one request and ignores the rest.
        let mut queue = || {
            if *finishing {
                return ControlFlow::Break(());
            }
            outbox.push();
            if *mode == ConnectionMode::SingleShot {
                *finishing = true;
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        };

        match scan {
            None => {
                for _request in gale_framer::boundaries(chunk) {
                    if queue().is_break() {
                        break;
                    }
                }
                Ok(())
            }
            Some(scan) => scan
                .feed(chunk, |_request| queue())
                .map(drop)
                .map_err(CloseReason::CarryOverflow),
        }
    }
}

/// Owns every open client connection, keyed by descriptor
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: HashMap<RawFd, Connection>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.connections.contains_key(&fd)
    }

    pub fn get(&self, fd: RawFd) -> Option<&Connection> {
        self.connections.get(&fd)
    }

    pub fn get_mut(&mut self, fd: RawFd) -> Option<&mut Connection> {
        self.connections.get_mut(&fd)
    }

    /// Take ownership of a connection. The descriptor is unique among open
    /// sockets, so it cannot already be present.
    pub fn insert(&mut self, connection: Connection) -> RawFd {
        let fd = connection.fd();
        let previous = self.connections.insert(fd, connection);
        debug_assert!(previous.is_none(), "descriptor {fd} tracked twice");
        fd
    }

    /// Remove a connection. `None` if it was already removed.
    pub fn remove(&mut self, fd: RawFd) -> Option<Connection> {
        self.connections.remove(&fd)
    }

    pub fn fds(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.connections.keys().copied()
    }

    /// Connections waiting on write readiness
    pub fn backlogged(&self) -> usize {
        self.connections
            .values()
            .filter(|c| c.is_backlogged())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    const REQUEST: &[u8] = b"GET / HTTP/1.1\r\n\r\n";

    fn connection_with(
        payload: Bytes,
        mode: ConnectionMode,
        scan: Option<ScanBuffer>,
    ) -> (TcpStream, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        crate::sockopt::configure_stream(&server, 64 * 1024).unwrap();
        (client, Connection::new(server, peer, payload, mode, scan))
    }

    fn connection(mode: ConnectionMode, scan: Option<ScanBuffer>) -> (TcpStream, Connection) {
        connection_with(Bytes::from_static(b"R"), mode, scan)
    }

    /// Give the bytes time to arrive, then handle one read notification.
    fn drain(conn: &mut Connection, stats: &ServerStats) -> Progress {
        let mut scratch = [0u8; 64];
        thread::sleep(Duration::from_millis(50));
        conn.on_readable(&mut scratch, stats)
    }

    #[test]
    fn test_pipelined_requests_in_one_read() {
        let (mut client, mut conn) = connection(ConnectionMode::Persistent, None);
        let stats = ServerStats::new();

        client.write_all(&[REQUEST, REQUEST].concat()).unwrap();
        assert!(matches!(drain(&mut conn, &stats), Progress::Idle));

        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"RR");
        assert_eq!(conn.responses(), 2);
        assert_eq!(conn.state(), ConnState::Reading);
        assert_eq!(stats.responses(), 2);
    }

    #[test]
    fn test_single_shot_stops_after_first() {
        let (mut client, mut conn) = connection(ConnectionMode::SingleShot, None);
        let stats = ServerStats::new();

        client.write_all(&[REQUEST, REQUEST].concat()).unwrap();
        let progress = drain(&mut conn, &stats);
        assert!(matches!(progress, Progress::Close(CloseReason::Done)));
        assert_eq!(conn.responses(), 1);
        assert_eq!(conn.pending(), 0);
    }

    #[test]
    fn test_eof_without_data() {
        let (client, mut conn) = connection(ConnectionMode::Persistent, None);
        let stats = ServerStats::new();

        drop(client);
        let progress = drain(&mut conn, &stats);
        assert!(matches!(progress, Progress::Close(CloseReason::Eof)));
        assert_eq!(conn.responses(), 0);
    }

    #[test]
    fn test_per_read_drops_split_terminator() {
        let (mut client, mut conn) = connection(ConnectionMode::Persistent, None);
        let stats = ServerStats::new();

        client.write_all(&REQUEST[..16]).unwrap();
        assert!(matches!(drain(&mut conn, &stats), Progress::Idle));
        client.write_all(&REQUEST[16..]).unwrap();
        assert!(matches!(drain(&mut conn, &stats), Progress::Idle));

        assert_eq!(conn.responses(), 0);
    }

    #[test]
    fn test_carry_joins_split_terminator() {
        let (mut client, mut conn) =
            connection(ConnectionMode::Persistent, Some(ScanBuffer::default()));
        let stats = ServerStats::new();

        client.write_all(&REQUEST[..16]).unwrap();
        assert!(matches!(drain(&mut conn, &stats), Progress::Idle));
        client.write_all(&REQUEST[16..]).unwrap();
        assert!(matches!(drain(&mut conn, &stats), Progress::Idle));

        assert_eq!(conn.responses(), 1);
    }

    #[test]
    fn test_carry_overflow_closes() {
        let (mut client, mut conn) =
            connection(ConnectionMode::Persistent, Some(ScanBuffer::with_limit(8)));
        let stats = ServerStats::new();

        client.write_all(b"GET /way-too-long HTTP/1.1").unwrap();
        match drain(&mut conn, &stats) {
            Progress::Close(reason) => {
                assert!(matches!(reason, CloseReason::CarryOverflow(_)));
                assert!(!reason.is_graceful());
            }
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[test]
    fn test_backlog_pauses_reads_until_drained() {
        let payload = Bytes::from(vec![b'x'; 8 * 1024 * 1024]);
        let (mut client, mut conn) =
            connection_with(payload.clone(), ConnectionMode::Persistent, None);
        let stats = ServerStats::new();
        let mut scratch = [0u8; 64];

        client.write_all(REQUEST).unwrap();
        assert!(matches!(drain(&mut conn, &stats), Progress::Backlogged));
        assert_eq!(conn.state(), ConnState::Responding);
        assert_eq!(conn.pending(), 1);
        assert_eq!(stats.responses(), 0);

        // Input behind a backlog is left unread.
        client.write_all(REQUEST).unwrap();
        assert!(matches!(drain(&mut conn, &stats), Progress::Backlogged));
        assert_eq!(conn.pending(), 1);

        let reader = thread::spawn(move || {
            let mut buf = vec![0u8; 2 * payload.len()];
            client.read_exact(&mut buf).unwrap();
            buf.iter().all(|&b| b == b'x')
        });

        let mut rounds = 0;
        while conn.responses() < 2 {
            rounds += 1;
            assert!(rounds < 1000, "backlog never drained");
            thread::sleep(Duration::from_millis(5));
            if let Progress::Close(reason) = conn.on_writable(&mut scratch, &stats) {
                panic!("unexpected close: {reason}");
            }
        }

        assert!(reader.join().unwrap());
        assert!(!conn.is_backlogged());
        assert_eq!(stats.responses(), 2);
    }

    #[test]
    fn test_writable_without_backlog_is_ignored() {
        let (_client, mut conn) = connection(ConnectionMode::Persistent, None);
        let stats = ServerStats::new();
        let mut scratch = [0u8; 64];

        assert!(matches!(conn.on_writable(&mut scratch, &stats), Progress::Idle));
        assert_eq!(conn.state(), ConnState::Registered);
    }

    #[test]
    fn test_table_remove_is_idempotent() {
        let (_client, conn) = connection(ConnectionMode::Persistent, None);
        let mut table = ConnectionTable::new();

        let fd = table.insert(conn);
        assert!(table.contains(fd));
        assert_eq!(table.get(fd).unwrap().state(), ConnState::Registered);

        assert!(table.remove(fd).is_some());
        assert!(table.remove(fd).is_none());
        assert!(table.is_empty());
    }
}
