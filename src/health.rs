//! Cached liveness state for the distributed store.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use tracing::{info, warn};

/// Default interval between liveness re-checks while unhealthy.
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(3);

/// Tracks whether the distributed store is worth talking to.
///
/// The flag is advisory and last-writer-wins: a stale "healthy" reading
/// costs one wasted timeout, not a correctness violation. While unhealthy,
/// [`should_attempt`](HealthMonitor::should_attempt) lets at most one caller
/// per refresh interval retry the store, so an outage never charges the
/// timeout budget to every request.
#[derive(Debug)]
pub struct HealthMonitor {
    healthy: AtomicBool,
    /// Epoch-ms of the last unhealthy-state probe attempt.
    last_attempt_ms: AtomicI64,
    refresh_interval: Duration,
}

impl HealthMonitor {
    /// Create a monitor with the default refresh interval.
    pub fn new() -> Self {
        Self::with_refresh_interval(DEFAULT_REFRESH_INTERVAL)
    }

    /// Create a monitor that re-checks the store every `refresh_interval`
    /// while unhealthy.
    pub fn with_refresh_interval(refresh_interval: Duration) -> Self {
        Self {
            healthy: AtomicBool::new(true),
            last_attempt_ms: AtomicI64::new(0),
            refresh_interval,
        }
    }

    /// Whether a caller at `now_ms` should attempt the distributed store.
    ///
    /// Always true while healthy. While unhealthy, the first caller after
    /// each refresh interval wins the retry; everyone else goes straight to
    /// the fallback.
    pub fn should_attempt(&self, now_ms: i64) -> bool {
        if self.healthy.load(Ordering::Acquire) {
            return true;
        }

        let interval_ms = self.refresh_interval.as_millis() as i64;
        self.last_attempt_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                (now_ms.saturating_sub(last) >= interval_ms).then_some(now_ms)
            })
            .is_ok()
    }

    /// Record a successful store interaction.
    pub fn record_success(&self) {
        if !self.healthy.swap(true, Ordering::AcqRel) {
            info!("Distributed store is healthy again");
        }
    }

    /// Record a failed store interaction, marking the store unhealthy
    /// immediately rather than waiting for the next scheduled probe.
    pub fn record_failure(&self, now_ms: i64) {
        self.last_attempt_ms.store(now_ms, Ordering::SeqCst);
        if self.healthy.swap(false, Ordering::AcqRel) {
            warn!("Distributed store marked unhealthy");
        }
    }

    /// Current cached state.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// The configured refresh interval, also used to pace the probe task.
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}
