//! gale-framer: HTTP/1.x request-boundary detection
//!
//! Locates the end of each request header block in a raw read buffer so a
//! server can answer pipelined requests without parsing them.
//!
//! ## Features
//! - Header terminator search (`\r\n\r\n`) backed by `memchr::memmem`
//! - Left-to-right, non-overlapping boundary iteration over one buffer
//! - [`ScanBuffer`]: bounded carry-over of residual bytes between reads, so a
//!   terminator split across two reads is still found
//!
//! Nothing here validates HTTP syntax. Any byte stream containing the
//! terminator counts as one complete request.
//!
//! ## Example
//! ```
//! use gale_framer::boundaries;
//!
//! let buf = b"GET / HTTP/1.1\r\n\r\nGET /a HTTP/1.1\r\n\r\nGET /partial";
//! let mut iter = boundaries(buf);
//! assert_eq!(iter.next(), Some(0..18));
//! assert_eq!(iter.next(), Some(18..37));
//! assert_eq!(iter.next(), None);
//! assert_eq!(iter.residual(), b"GET /partial");
//! ```

use std::fmt;
use std::ops::{ControlFlow, Range};

use memchr::memmem;

/// End-of-headers marker
pub const HEADER_TERMINATOR: &[u8; 4] = b"\r\n\r\n";

/// Default cap on bytes a [`ScanBuffer`] may hold without seeing a terminator
pub const DEFAULT_CARRY_LIMIT: usize = 64 * 1024;

/// Offset just past the first header terminator in `buf`, if any.
#[inline]
pub fn find_boundary(buf: &[u8]) -> Option<usize> {
    memmem::find(buf, HEADER_TERMINATOR).map(|i| i + HEADER_TERMINATOR.len())
}

/// Iterate over the complete requests in `buf`.
#[inline]
pub fn boundaries(buf: &[u8]) -> Boundaries<'_> {
    Boundaries { buf, pos: 0 }
}

/// Number of complete requests in `buf`.
pub fn count_boundaries(buf: &[u8]) -> usize {
    boundaries(buf).count()
}

/// Iterator over request spans within one buffer.
///
/// Each item is the byte range of one request, terminator included.
#[derive(Debug, Clone)]
pub struct Boundaries<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Boundaries<'a> {
    /// Bytes consumed by the requests yielded so far
    pub fn consumed(&self) -> usize {
        self.pos
    }

    /// Bytes after the last yielded request
    pub fn residual(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

impl<'a> Iterator for Boundaries<'a> {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.pos;
        let end = start + find_boundary(&self.buf[start..])?;
        self.pos = end;
        Some(start..end)
    }
}

/// A [`ScanBuffer`] grew past its limit without completing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityExceeded {
    pub pending: usize,
    pub limit: usize,
}

impl fmt::Display for CapacityExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "incomplete request of {} bytes exceeds carry limit of {} bytes",
            self.pending, self.limit
        )
    }
}

impl std::error::Error for CapacityExceeded {}

/// Result of feeding one read into a [`ScanBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Feed {
    /// Complete requests handed to the callback
    pub requests: usize,
    /// The callback asked to stop; remaining bytes were discarded
    pub stopped: bool,
}

/// Per-connection scan state that survives between reads.
///
/// Residual bytes after the last boundary are kept until the next
/// [`feed`](ScanBuffer::feed), so requests split across reads are still
/// framed correctly.
#[derive(Debug, Clone)]
pub struct ScanBuffer {
    pending: Vec<u8>,
    limit: usize,
}

impl Default for ScanBuffer {
    fn default() -> Self {
        Self::with_limit(DEFAULT_CARRY_LIMIT)
    }
}

impl ScanBuffer {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            limit,
        }
    }

    /// Bytes held over from earlier reads
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Scan `data` (appended to any carried bytes) and call `on_request` once
    /// per complete request, in arrival order.
    ///
    /// Returning [`ControlFlow::Break`] from the callback stops the scan and
    /// drops everything not yet consumed.
    pub fn feed<F>(&mut self, data: &[u8], mut on_request: F) -> Result<Feed, CapacityExceeded>
    where
        F: FnMut(&[u8]) -> ControlFlow<()>,
    {
        let mut feed = Feed::default();

        // Nothing carried: scan the caller's buffer in place and only copy the tail.
        if self.pending.is_empty() {
            let mut iter = boundaries(data);
            for span in iter.by_ref() {
                feed.requests += 1;
                if on_request(&data[span]).is_break() {
                    feed.stopped = true;
                    return Ok(feed);
                }
            }
            let residual = iter.residual();
            self.check_limit(residual.len())?;
            self.pending.extend_from_slice(residual);
            return Ok(feed);
        }

        // The carried bytes hold no terminator, but one may straddle the join.
        let rescan_from = self.pending.len().saturating_sub(HEADER_TERMINATOR.len() - 1);
        self.pending.extend_from_slice(data);

        let mut start = 0;
        let mut search_from = rescan_from;
        while let Some(offset) = find_boundary(&self.pending[search_from..]) {
            let end = search_from + offset;
            feed.requests += 1;
            if on_request(&self.pending[start..end]).is_break() {
                feed.stopped = true;
                self.pending.clear();
                return Ok(feed);
            }
            start = end;
            search_from = end;
        }

        self.pending.drain(..start);
        if let Err(err) = self.check_limit(self.pending.len()) {
            self.pending.clear();
            return Err(err);
        }
        Ok(feed)
    }

    fn check_limit(&self, pending: usize) -> Result<(), CapacityExceeded> {
        if pending > self.limit {
            return Err(CapacityExceeded {
                pending,
                limit: self.limit,
            });
        }
        Ok(())
    }
}
