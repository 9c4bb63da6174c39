//! Statistics and counters for the streaming pipeline
//!
//! Every counter is a relaxed atomic: each one is mutated by several tasks,
//! but no decision depends on two counters being observed together.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Shared pipeline counters
#[derive(Debug)]
pub struct PipelineStats {
    frames_captured: AtomicU64,
    frames_skipped: AtomicU64,
    dropped_queue_full: AtomicU64,
    dropped_evicted: AtomicU64,
    dropped_stale: AtomicU64,
    frames_encoded: AtomicU64,
    encode_failures: AtomicU64,
    encode_timeouts: AtomicU64,
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    clients_accepted: AtomicU64,
    clients_rejected: AtomicU64,
    clients_evicted: AtomicU64,
    restarts: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Frames taken from the source and admitted to the queue
    pub frames_captured: u64,
    /// Ticks skipped by admission (no clients, or performance-mode skip)
    pub frames_skipped: u64,
    /// Frames refused because the queue was at capacity
    pub dropped_queue_full: u64,
    /// Frames evicted from the head of a full queue
    pub dropped_evicted: u64,
    /// Frames discarded at dequeue because they exceeded the max age
    pub dropped_stale: u64,
    /// Successful JPEG encodes
    pub frames_encoded: u64,
    /// Encodes that returned an error
    pub encode_failures: u64,
    /// Encodes abandoned after the timeout
    pub encode_timeouts: u64,
    /// Frame parts written to clients
    pub frames_sent: u64,
    /// Bytes written to clients (headers included)
    pub bytes_sent: u64,
    /// Stream clients admitted to the registry
    pub clients_accepted: u64,
    /// Stream clients refused because the cap was reached
    pub clients_rejected: u64,
    /// Clients removed after a write error or idle timeout
    pub clients_evicted: u64,
    /// Pipeline restarts (external or supervisor-triggered)
    pub restarts: u64,
}

impl StatsSnapshot {
    /// Frames dropped for any reason
    pub fn frames_dropped(&self) -> u64 {
        self.dropped_queue_full + self.dropped_evicted + self.dropped_stale
    }
}

/// Periodic health summary emitted by the health sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSnapshot {
    /// Time since the current pipeline run started
    pub uptime: Duration,
    /// Connected stream clients
    pub clients: usize,
    /// Cumulative dropped frames
    pub frames_dropped: u64,
    /// Encode operations currently in flight
    pub active_encodes: usize,
}

impl PipelineStats {
    /// Create a zeroed counter set
    pub fn new() -> Self {
        Self {
            frames_captured: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            dropped_queue_full: AtomicU64::new(0),
            dropped_evicted: AtomicU64::new(0),
            dropped_stale: AtomicU64::new(0),
            frames_encoded: AtomicU64::new(0),
            encode_failures: AtomicU64::new(0),
            encode_timeouts: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            clients_accepted: AtomicU64::new(0),
            clients_rejected: AtomicU64::new(0),
            clients_evicted: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
        }
    }

    pub fn record_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_full(&self) {
        self.dropped_queue_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self) {
        self.dropped_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale(&self) {
        self.dropped_stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_encoded(&self) {
        self.frames_encoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_encode_failure(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_encode_timeout(&self) {
        self.encode_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_client_accepted(&self) {
        self.clients_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_client_rejected(&self) {
        self.clients_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_clients_evicted(&self, count: usize) {
        self.clients_evicted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    /// Dropped frames for any reason
    pub fn frames_dropped(&self) -> u64 {
        self.dropped_queue_full.load(Ordering::Relaxed)
            + self.dropped_evicted.load(Ordering::Relaxed)
            + self.dropped_stale.load(Ordering::Relaxed)
    }

    /// Take a consistent-enough copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            dropped_queue_full: self.dropped_queue_full.load(Ordering::Relaxed),
            dropped_evicted: self.dropped_evicted.load(Ordering::Relaxed),
            dropped_stale: self.dropped_stale.load(Ordering::Relaxed),
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            encode_timeouts: self.encode_timeouts.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            clients_accepted: self.clients_accepted.load(Ordering::Relaxed),
            clients_rejected: self.clients_rejected.load(Ordering::Relaxed),
            clients_evicted: self.clients_evicted.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}
