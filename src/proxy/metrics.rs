//! Aggregate request counters

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::Error;

/// Process-wide counters, shared by every connection
#[derive(Debug)]
pub struct ProxyMetrics {
    processed: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
    started_at: DateTime<Utc>,
    started: Instant,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_processed: u64,
    pub requests_rejected: u64,
    pub requests_failed: u64,
}

impl ProxyMetrics {
    pub fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    /// A request passed admission
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// A request was refused before any outbound call
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// An admitted request failed upstream or while relaying
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an error against the matching counter
    pub fn record_error(&self, error: &Error) {
        if error.is_rejection() {
            self.record_rejected();
        } else {
            self.record_failed();
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_processed: self.processed.load(Ordering::Relaxed),
            requests_rejected: self.rejected.load(Ordering::Relaxed),
            requests_failed: self.failed.load(Ordering::Relaxed),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = ProxyMetrics::new();
        metrics.record_processed();
        metrics.record_processed();
        metrics.record_error(&Error::NoTargetSpecified);
        metrics.record_error(&Error::UpstreamUnreachable("refused".into()));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_processed, 2);
        assert_eq!(snapshot.requests_rejected, 1);
        assert_eq!(snapshot.requests_failed, 1);
    }
}
