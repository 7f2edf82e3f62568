//! Background maintenance owned by an explicit lifecycle handle.
//!
//! Three loops keep the limiter healthy without touching the request path:
//! a liveness probe for the distributed store, the fallback-store janitor,
//! and the stats flush.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::clock::Clock;
use crate::stats::{MetricsSink, StatsCollector};
use crate::store::HealthAwareStore;

/// Intervals for the maintenance loops.
#[derive(Debug, Clone, Copy)]
pub struct MaintenanceConfig {
    /// How often to ping the distributed store.
    pub probe_interval: Duration,
    /// How often to run the fallback-store janitor.
    pub sweep_interval: Duration,
    /// Idle horizon after which an empty key is released, independent of
    /// any window size.
    pub retention: Duration,
    /// How often to flush stats to the metrics sink.
    pub flush_interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(3),
            sweep_interval: Duration::from_secs(60),
            retention: Duration::from_secs(24 * 3600),
            flush_interval: Duration::from_secs(60),
        }
    }
}

/// Handle to the spawned maintenance tasks.
///
/// Dropping the handle stops all loops, so the composition root decides the
/// lifetime instead of fire-and-forget timers.
pub struct MaintenanceTasks {
    handles: Vec<JoinHandle<()>>,
}

impl MaintenanceTasks {
    /// Stop all maintenance loops.
    pub fn shutdown(self) {
        // Drop aborts.
    }
}

impl Drop for MaintenanceTasks {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Spawn the probe, sweep, and flush loops for a composed store.
pub fn spawn_maintenance(
    store: &HealthAwareStore,
    stats: Arc<StatsCollector>,
    sink: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    config: MaintenanceConfig,
) -> MaintenanceTasks {
    let probe = {
        let primary = store.primary().clone();
        let health = store.health().clone();
        let clock = clock.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.probe_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match primary.ping().await {
                    Ok(()) => health.record_success(),
                    Err(error) => {
                        debug!(%error, "Liveness probe failed");
                        health.record_failure(clock.now_ms());
                    }
                }
            }
        })
    };

    let sweep = {
        let fallback = store.fallback().clone();
        let clock = clock.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                fallback.sweep(clock.now_ms(), config.retention);
            }
        })
    };

    let flush = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let snapshot = stats.snapshot_and_reset();
            sink.report(&snapshot);
        }
    });

    MaintenanceTasks {
        handles: vec![probe, sweep, flush],
    }
}
