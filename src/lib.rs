//! Floodgate - Distributed Sliding-Window Admission Control
//!
//! This crate decides, for a given logical key, whether an incoming unit of
//! work may proceed under a moving time window and a maximum-count budget,
//! across a fleet of stateless processes that share no memory. A Redis-backed
//! store provides the atomic cross-process window; a bounded in-process store
//! takes over during outages under an explicit fail-open/fail-closed policy.
//!
//! The surrounding system supplies the key, a named preset, and a metrics
//! sink; translating decisions into protocol responses (headers, status
//! codes) is the caller's concern.

pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod limiter;
pub mod stats;
pub mod store;
pub mod tasks;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigRegistry, RateLimitConfig};
pub use error::ConfigError;
pub use health::HealthMonitor;
pub use limiter::{RateLimitDecision, SlidingWindowLimiter};
pub use stats::{MetricsSink, StatsCollector, StatsSnapshot, TracingMetricsSink};
pub use store::{
    Admission, DistributedWindowStore, HealthAwareStore, MemoryWindowStore, StoreError,
    StoreSource, WindowStore,
};
pub use tasks::{spawn_maintenance, MaintenanceConfig, MaintenanceTasks};
