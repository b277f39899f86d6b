//! Readiness multiplexer
//!
//! [`Poller`] is the only surface the event loop sees: register a descriptor
//! for edge-triggered readiness, change or drop that interest, and block until
//! something is ready. One adapter exists per platform facility and [`DefaultPoller`]
//! picks the one for the build target.
//!
//! Edge-triggered means a descriptor is reported once per transition to
//! ready. Whoever consumes an [`Event`] must drain the descriptor until the
//! underlying call reports "would block", or no further event is guaranteed.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use epoll::Epoll;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
mod kqueue;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub use kqueue::Kqueue;

/// Multiplexer for the build target
#[cfg(any(target_os = "linux", target_os = "android"))]
pub type DefaultPoller = Epoll;

/// Multiplexer for the build target
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub type DefaultPoller = Kqueue;

/// One readiness notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub fd: RawFd,
    pub readable: bool,
    /// Send buffer has room again. Only reported under [`Interest::ReadWrite`].
    pub writable: bool,
    /// Peer hung up or the socket is in error. Reads still drain first.
    pub closed: bool,
}

/// Which transitions a descriptor is watched for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    /// Readable plus writable, for a connection with unsent output
    ReadWrite,
}

impl Interest {
    pub fn is_writable(self) -> bool {
        self == Interest::ReadWrite
    }
}

/// Reusable event batch filled by [`Poller::wait`]
#[derive(Debug)]
pub struct Events {
    list: Vec<Event>,
    capacity: usize,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            list: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Max events collected per wait
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.list.iter()
    }

    pub fn clear(&mut self) {
        self.list.clear();
    }

    pub(crate) fn push(&mut self, event: Event) {
        self.list.push(event);
    }
}

impl<'a> IntoIterator for &'a Events {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Platform readiness facility
pub trait Poller {
    /// Backend name for diagnostics
    fn name(&self) -> &'static str;

    /// Start watching `fd` with edge-triggered `interest`.
    fn register(&mut self, fd: RawFd, interest: Interest) -> io::Result<()>;

    /// Replace the interest of a registered descriptor. A writable edge that
    /// is already pending is reported by the next wait.
    fn reregister(&mut self, fd: RawFd, interest: Interest) -> io::Result<()>;

    /// Stop watching `fd`. Unknown descriptors are not an error.
    fn deregister(&mut self, fd: RawFd) -> io::Result<()>;

    /// Block until at least one descriptor is ready or `timeout` expires
    /// (`None` waits forever). Replaces the contents of `events`.
    ///
    /// A wait interrupted by a signal returns with no events.
    fn wait(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()>;
}

/// Milliseconds for a wait call; sub-millisecond timeouts round up so they
/// never turn into a busy poll.
#[cfg_attr(not(any(target_os = "linux", target_os = "android")), allow(dead_code))]
pub(crate) fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = d.as_millis();
            let ms = if ms == 0 && !d.is_zero() { 1 } else { ms };
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}
