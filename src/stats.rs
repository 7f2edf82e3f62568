//! Interval counters for admission outcomes.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use crate::store::StoreSource;

/// Counter values for one reporting interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Evaluations performed.
    pub total_requests: u64,
    /// Evaluations that ended in a rejection.
    pub blocked_requests: u64,
    /// Distributed-store attempts that errored or timed out.
    pub backend_errors: u64,
    /// Evaluations served by the in-process fallback store.
    pub fallback_usage: u64,
}

/// Receives a [`StatsSnapshot`] on every flush.
///
/// Implementations live outside this crate (a metrics pipeline, a log
/// shipper); [`TracingMetricsSink`] is the built-in default.
pub trait MetricsSink: Send + Sync {
    fn report(&self, snapshot: &StatsSnapshot);
}

/// Emits each snapshot as a structured tracing event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn report(&self, snapshot: &StatsSnapshot) {
        info!(
            total_requests = snapshot.total_requests,
            blocked_requests = snapshot.blocked_requests,
            backend_errors = snapshot.backend_errors,
            fallback_usage = snapshot.fallback_usage,
            "Rate limit interval stats"
        );
    }
}

/// Accumulates admission counters between flushes.
#[derive(Debug, Default)]
pub struct StatsCollector {
    total_requests: AtomicU64,
    blocked_requests: AtomicU64,
    backend_errors: AtomicU64,
    fallback_usage: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one evaluation outcome.
    pub fn record(&self, allowed: bool, source: StoreSource, primary_failed: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if !allowed {
            self.blocked_requests.fetch_add(1, Ordering::Relaxed);
        }
        if primary_failed {
            self.backend_errors.fetch_add(1, Ordering::Relaxed);
        }
        if source == StoreSource::Fallback {
            self.fallback_usage.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Read and zero all counters, starting the next interval.
    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests.swap(0, Ordering::Relaxed),
            blocked_requests: self.blocked_requests.swap(0, Ordering::Relaxed),
            backend_errors: self.backend_errors.swap(0, Ordering::Relaxed),
            fallback_usage: self.fallback_usage.swap(0, Ordering::Relaxed),
        }
    }

    /// Read the counters without resetting them.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            blocked_requests: self.blocked_requests.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
            fallback_usage: self.fallback_usage.load(Ordering::Relaxed),
        }
    }
}
