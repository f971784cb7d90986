//! Transport traffic counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters shared by every task of the active transport
#[derive(Debug, Default)]
pub struct TransportStats {
    pub(crate) frames_sent: AtomicU64,
    pub(crate) frames_received: AtomicU64,
    pub(crate) bytes_sent: AtomicU64,
    pub(crate) bytes_received: AtomicU64,
    pub(crate) heartbeats_sent: AtomicU64,
    pub(crate) connect_attempts: AtomicU64,
    pub(crate) connections_established: AtomicU64,
    pub(crate) unmatched_responses: AtomicU64,
    pub(crate) synthetic_errors: AtomicU64,
    pub(crate) batches_sent: AtomicU64,
    pub(crate) batch_retries: AtomicU64,
    pub(crate) polls_sent: AtomicU64,
    pub(crate) empty_polls: AtomicU64,
}

/// Point-in-time copy of [`TransportStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStatsSnapshot {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub heartbeats_sent: u64,
    pub connect_attempts: u64,
    pub connections_established: u64,
    pub unmatched_responses: u64,
    pub synthetic_errors: u64,
    pub batches_sent: u64,
    pub batch_retries: u64,
    pub polls_sent: u64,
    pub empty_polls: u64,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_sent(&self, frames: usize, bytes: usize) {
        self.frames_sent.fetch_add(frames as u64, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, frames: usize, bytes: usize) {
        self.frames_received
            .fetch_add(frames as u64, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TransportStatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        TransportStatsSnapshot {
            frames_sent: load(&self.frames_sent),
            frames_received: load(&self.frames_received),
            bytes_sent: load(&self.bytes_sent),
            bytes_received: load(&self.bytes_received),
            heartbeats_sent: load(&self.heartbeats_sent),
            connect_attempts: load(&self.connect_attempts),
            connections_established: load(&self.connections_established),
            unmatched_responses: load(&self.unmatched_responses),
            synthetic_errors: load(&self.synthetic_errors),
            batches_sent: load(&self.batches_sent),
            batch_retries: load(&self.batch_retries),
            polls_sent: load(&self.polls_sent),
            empty_polls: load(&self.empty_polls),
        }
    }
}
