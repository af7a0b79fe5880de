//! Dispatcher metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// In-process counters for one dispatcher
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Envelopes accepted by `submit`
    submitted: AtomicU64,
    /// Submissions refused (circuit open / shutting down)
    refused: AtomicU64,
    /// Broker attempts, successful or not
    attempts: AtomicU64,
    /// Failed attempts (transient, permanent, or timed out)
    failed_attempts: AtomicU64,
    /// Envelopes that reached `Delivered`
    delivered: AtomicU64,
    /// Envelopes that reached `DeadLettered`
    dead_lettered: AtomicU64,
    /// Envelopes left non-terminal when shutdown gave up on them
    abandoned: AtomicU64,
    /// Dispatch tasks currently running
    in_flight: AtomicUsize,
}

impl DispatchMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn inc_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn refused(&self) -> u64 {
        self.refused.load(Ordering::Relaxed)
    }

    pub fn inc_refused(&self) {
        self.refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn inc_attempts(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed_attempts(&self) -> u64 {
        self.failed_attempts.load(Ordering::Relaxed)
    }

    pub fn inc_failed_attempts(&self) {
        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn inc_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }

    pub fn inc_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    pub fn inc_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Increment in-flight count, returning the new value
    pub fn task_started(&self) -> usize {
        self.in_flight.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrement in-flight count, returning the new value
    pub fn task_finished(&self) -> usize {
        self.in_flight.fetch_sub(1, Ordering::Relaxed).saturating_sub(1)
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submitted: self.submitted(),
            refused: self.refused(),
            attempts: self.attempts(),
            failed_attempts: self.failed_attempts(),
            delivered: self.delivered(),
            dead_lettered: self.dead_lettered(),
            abandoned: self.abandoned(),
            in_flight: self.in_flight(),
        }
    }
}

/// Snapshot of dispatcher metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub refused: u64,
    pub attempts: u64,
    pub failed_attempts: u64,
    pub delivered: u64,
    pub dead_lettered: u64,
    pub abandoned: u64,
    pub in_flight: usize,
}
