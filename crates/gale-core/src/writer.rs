//! Response writer
//!
//! Writes never wait. A response that does not fit in the socket's send
//! buffer leaves its unsent tail in the connection's [`Outbox`], together with
//! a count of responses still owed to requests framed after it. The event
//! loop resumes the flush when the multiplexer reports the socket writable.

use std::io;
use std::net::TcpStream;

use bytes::{Buf, Bytes};

use crate::io::{send, SendOutcome};

/// Destination for response bytes
pub trait Sink {
    fn send(&mut self, buf: &[u8]) -> SendOutcome;
}

impl Sink for TcpStream {
    fn send(&mut self, buf: &[u8]) -> SendOutcome {
        send(self, buf)
    }
}

/// How a single write attempt ended
#[derive(Debug)]
pub enum WriteOutcome {
    /// Every byte was accepted by the kernel
    Complete,
    /// The send buffer filled after this many bytes
    Blocked(usize),
    Failed(io::Error),
}

/// Write as much of `payload` as the sink takes without blocking, retrying
/// partial writes.
pub fn write_response<S: Sink + ?Sized>(sink: &mut S, payload: &[u8]) -> WriteOutcome {
    let mut sent = 0;
    while sent < payload.len() {
        match sink.send(&payload[sent..]) {
            SendOutcome::Sent(n) => sent += n,
            SendOutcome::WouldBlock => return WriteOutcome::Blocked(sent),
            SendOutcome::Failed(e) => return WriteOutcome::Failed(e),
        }
    }
    WriteOutcome::Complete
}

/// Result of draining an [`Outbox`]
#[derive(Debug)]
pub enum Flush {
    /// Nothing left to send
    Drained { completed: u64 },
    /// The sink stopped taking bytes; wait for write readiness
    Blocked { completed: u64 },
    Failed(io::Error),
}

/// Per-connection output backlog
///
/// Every owed response is the same payload, so the backlog is one partially
/// sent response plus a counter rather than a byte queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    payload: Bytes,
    /// Unsent remainder of the response in flight
    tail: Bytes,
    /// Whole responses queued behind `tail`
    owed: u64,
}

impl Outbox {
    pub fn new(payload: Bytes) -> Self {
        Self {
            payload,
            tail: Bytes::new(),
            owed: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tail.is_empty() && self.owed == 0
    }

    /// Responses not yet fully sent, counting the one in flight
    pub fn pending(&self) -> u64 {
        self.owed + u64::from(!self.tail.is_empty())
    }

    /// Queue one response behind everything already pending.
    pub fn push(&mut self) {
        self.owed += 1;
    }

    /// Send pending responses in order until empty or the sink would block.
    pub fn flush<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Flush {
        let mut completed = 0;
        loop {
            if self.tail.is_empty() {
                if self.owed == 0 {
                    return Flush::Drained { completed };
                }
                self.owed -= 1;
                self.tail = self.payload.clone();
            }

            match write_response(sink, &self.tail) {
                WriteOutcome::Complete => {
                    self.tail.clear();
                    completed += 1;
                }
                WriteOutcome::Blocked(sent) => {
                    self.tail.advance(sent);
                    return Flush::Blocked { completed };
                }
                WriteOutcome::Failed(e) => return Flush::Failed(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts at most `chunk` bytes per call and refuses every other call.
    struct Throttled {
        out: Vec<u8>,
        chunk: usize,
        calls: usize,
    }

    impl Throttled {
        fn new(chunk: usize) -> Self {
            Self {
                out: Vec::new(),
                chunk,
                calls: 0,
            }
        }
    }

    impl Sink for Throttled {
        fn send(&mut self, buf: &[u8]) -> SendOutcome {
            self.calls += 1;
            if self.calls % 2 == 0 {
                return SendOutcome::WouldBlock;
            }
            let n = buf.len().min(self.chunk);
            self.out.extend_from_slice(&buf[..n]);
            SendOutcome::Sent(n)
        }
    }

    const PAYLOAD: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK";

    #[test]
    fn test_write_stops_at_would_block() {
        let mut sink = Throttled::new(3);
        match write_response(&mut sink, PAYLOAD) {
            WriteOutcome::Blocked(sent) => assert_eq!(sent, 3),
            other => panic!("expected would-block, got {other:?}"),
        }
        assert_eq!(sink.out, &PAYLOAD[..3]);
    }

    #[test]
    fn test_throttled_flush_is_byte_exact() {
        let mut sink = Throttled::new(3);
        let mut outbox = Outbox::new(Bytes::from_static(PAYLOAD));
        outbox.push();
        outbox.push();
        outbox.push();
        assert_eq!(outbox.pending(), 3);

        let mut completed = 0;
        let mut rounds = 0;
        loop {
            rounds += 1;
            match outbox.flush(&mut sink) {
                Flush::Blocked { completed: n } => completed += n,
                Flush::Drained { completed: n } => {
                    completed += n;
                    break;
                }
                Flush::Failed(e) => panic!("unexpected failure: {e}"),
            }
        }

        assert_eq!(completed, 3);
        assert!(rounds > 3);
        assert!(outbox.is_empty());
        assert_eq!(sink.out, PAYLOAD.repeat(3));
    }

    #[test]
    fn test_blocked_flush_keeps_backlog() {
        let mut sink = Throttled::new(PAYLOAD.len() + 10);
        let mut outbox = Outbox::new(Bytes::from_static(PAYLOAD));
        outbox.push();
        outbox.push();

        // First response fits, the second hits would-block before any byte.
        match outbox.flush(&mut sink) {
            Flush::Blocked { completed } => assert_eq!(completed, 1),
            other => panic!("expected would-block, got {other:?}"),
        }
        assert_eq!(outbox.pending(), 1);
        assert!(!outbox.is_empty());
        assert_eq!(sink.out, PAYLOAD);
    }

    struct Broken;

    impl Sink for Broken {
        fn send(&mut self, _buf: &[u8]) -> SendOutcome {
            SendOutcome::Failed(io::ErrorKind::BrokenPipe.into())
        }
    }

    #[test]
    fn test_hard_failure() {
        match write_response(&mut Broken, PAYLOAD) {
            WriteOutcome::Failed(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("expected failure, got {other:?}"),
        }

        let mut outbox = Outbox::new(Bytes::from_static(PAYLOAD));
        outbox.push();
        assert!(matches!(outbox.flush(&mut Broken), Flush::Failed(_)));
    }

    #[test]
    fn test_empty_outbox_sends_nothing() {
        let mut outbox = Outbox::new(Bytes::from_static(PAYLOAD));
        assert!(matches!(
            outbox.flush(&mut Broken),
            Flush::Drained { completed: 0 }
        ));
        assert!(matches!(write_response(&mut Broken, b""), WriteOutcome::Complete));
    }
}
