//! Typed outcomes for non-blocking socket calls
//!
//! Every drain loop matches on one of these instead of inspecting
//! `io::ErrorKind` inline, so "would block" can never be mistaken for data or
//! silently skipped.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

/// Result of one `recv`
#[derive(Debug)]
pub enum RecvOutcome {
    /// Bytes were read into the buffer
    Data(usize),
    /// Nothing more to read until the next readiness notification
    WouldBlock,
    /// Peer closed its side
    Eof,
    Failed(io::Error),
}

/// Result of one `send`
#[derive(Debug)]
pub enum SendOutcome {
    Sent(usize),
    WouldBlock,
    Failed(io::Error),
}

/// Result of one `accept`
#[derive(Debug)]
pub enum AcceptOutcome {
    Accepted(TcpStream, SocketAddr),
    /// Backlog drained
    WouldBlock,
    Failed(io::Error),
}

pub fn recv<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> RecvOutcome {
    loop {
        return match source.read(buf) {
            Ok(0) => RecvOutcome::Eof,
            Ok(n) => RecvOutcome::Data(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => RecvOutcome::WouldBlock,
            Err(e) => RecvOutcome::Failed(e),
        };
    }
}

/// A zero-length send for a non-empty buffer is reported as a failure.
pub fn send<W: Write + ?Sized>(sink: &mut W, buf: &[u8]) -> SendOutcome {
    loop {
        return match sink.write(buf) {
            Ok(0) if !buf.is_empty() => SendOutcome::Failed(io::ErrorKind::WriteZero.into()),
            Ok(n) => SendOutcome::Sent(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => SendOutcome::WouldBlock,
            Err(e) => SendOutcome::Failed(e),
        };
    }
}

pub fn accept(listener: &TcpListener) -> AcceptOutcome {
    loop {
        return match listener.accept() {
            Ok((stream, peer)) => AcceptOutcome::Accepted(stream, peer),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => AcceptOutcome::WouldBlock,
            Err(e) => AcceptOutcome::Failed(e),
        };
    }
}
