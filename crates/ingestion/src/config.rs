//! HTTP surface configuration and metrics

use std::sync::atomic::{AtomicU64, Ordering};

use contracts::ServerConfig;

/// HTTP surface configuration
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Bodies above this size are answered with 413
    pub max_body_bytes: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for IngestionConfig {
    fn from(server: &ServerConfig) -> Self {
        Self {
            max_body_bytes: server.max_body_bytes,
        }
    }
}

/// Ingestion metrics
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    /// Requests answered with 202
    pub accepted: AtomicU64,

    /// Requests answered with 400
    pub invalid: AtomicU64,

    /// Requests refused by the dispatcher (503 / 500)
    pub refused: AtomicU64,
}

impl IngestionMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refused(&self) {
        self.refused.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub accepted: u64,
    pub invalid: u64,
    pub refused: u64,
}
