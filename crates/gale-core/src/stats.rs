//! Connection and response counters
//!
//! The event loop is the only writer. Counters are atomic so another thread
//! can observe a running server through a shared handle.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ServerStats {
    accepted: AtomicU64,
    closed: AtomicU64,
    responses: AtomicU64,
    accept_errors: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub active: u64,
    pub closed: u64,
    pub responses: u64,
    pub accept_errors: u64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_accept(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_close(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_response(&self) {
        self.responses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_accept_error(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::Relaxed)
    }

    /// Connections accepted and not yet closed
    pub fn active(&self) -> u64 {
        self.accepted().saturating_sub(self.closed())
    }

    pub fn responses(&self) -> u64 {
        self.responses.load(Ordering::Relaxed)
    }

    pub fn accept_errors(&self) -> u64 {
        self.accept_errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let accepted = self.accepted();
        let closed = self.closed();
        StatsSnapshot {
            accepted,
            active: accepted.saturating_sub(closed),
            closed,
            responses: self.responses(),
            accept_errors: self.accept_errors(),
        }
    }
}
