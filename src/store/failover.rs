//! Health-aware composition of the distributed and fallback stores.
//!
//! The failover policy lives here and nowhere else: the limiter sees one
//! `try_admit` that always answers, annotated with which store answered.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::warn;

use crate::health::HealthMonitor;

use super::{Admission, MemoryWindowStore, StoreError, WindowStore};

/// Default budget for one distributed-store attempt.
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(100);

/// Which store produced an admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreSource {
    Distributed,
    Fallback,
}

/// An admission plus the route it took.
#[derive(Debug, Clone, Copy)]
pub struct RoutedAdmission {
    pub admission: Admission,
    pub source: StoreSource,
    /// True when the distributed store was attempted this call and failed
    /// (as opposed to being skipped by the health gate).
    pub primary_failed: bool,
}

/// Tries the distributed store under a bounded timeout and falls back to
/// the in-process store, consulting the [`HealthMonitor`] so an outage does
/// not charge the timeout to every request.
pub struct HealthAwareStore {
    primary: Arc<dyn WindowStore>,
    fallback: Arc<MemoryWindowStore>,
    health: Arc<HealthMonitor>,
    attempt_timeout: Duration,
}

impl HealthAwareStore {
    /// Compose the stores with the default attempt timeout.
    pub fn new(
        primary: Arc<dyn WindowStore>,
        fallback: Arc<MemoryWindowStore>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self::with_timeout(primary, fallback, health, DEFAULT_ATTEMPT_TIMEOUT)
    }

    /// Compose the stores with an explicit attempt timeout.
    pub fn with_timeout(
        primary: Arc<dyn WindowStore>,
        fallback: Arc<MemoryWindowStore>,
        health: Arc<HealthMonitor>,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            primary,
            fallback,
            health,
            attempt_timeout,
        }
    }

    /// Attempt an admission, never failing and never blocking past the
    /// attempt timeout plus in-memory fallback latency.
    pub async fn try_admit(
        &self,
        key: &str,
        now_ms: i64,
        window_size_ms: u64,
        max_requests: u32,
    ) -> RoutedAdmission {
        let mut primary_failed = false;

        if self.health.should_attempt(now_ms) {
            let attempt = timeout(
                self.attempt_timeout,
                self.primary
                    .try_admit(key, now_ms, window_size_ms, max_requests),
            )
            .await;

            match attempt {
                Ok(Ok(admission)) => {
                    self.health.record_success();
                    return RoutedAdmission {
                        admission,
                        source: StoreSource::Distributed,
                        primary_failed: false,
                    };
                }
                Ok(Err(error)) => {
                    warn!(key, %error, "Distributed store attempt failed, using fallback");
                    self.health.record_failure(now_ms);
                    primary_failed = true;
                }
                Err(_) => {
                    let error = StoreError::Timeout(self.attempt_timeout);
                    warn!(key, %error, "Distributed store attempt timed out, using fallback");
                    self.health.record_failure(now_ms);
                    primary_failed = true;
                }
            }
        }

        let admission = self
            .fallback
            .admit(key, now_ms, window_size_ms, max_requests);
        RoutedAdmission {
            admission,
            source: StoreSource::Fallback,
            primary_failed,
        }
    }

    /// The in-process fallback store (for the sweep task).
    pub fn fallback(&self) -> &Arc<MemoryWindowStore> {
        &self.fallback
    }

    /// The distributed store (for the probe task).
    pub fn primary(&self) -> &Arc<dyn WindowStore> {
        &self.primary
    }

    /// The shared health monitor.
    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }
}
