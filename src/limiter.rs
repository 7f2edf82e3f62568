//! Core admission decision logic.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::clock::Clock;
use crate::config::{ConfigRegistry, RateLimitConfig};
use crate::stats::StatsCollector;
use crate::store::{Admission, HealthAwareStore};

/// The outcome of one admission evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the unit of work may proceed.
    pub allowed: bool,
    /// Entries counted in the key's window, this admission included.
    pub current: u32,
    /// The preset's budget.
    pub limit: u32,
    /// Budget left, `limit - current` floored at zero.
    pub remaining: u32,
    /// Epoch-ms at which the oldest counted entry leaves the window.
    pub reset_time: i64,
    /// Whole seconds to wait before retrying; zero when allowed.
    pub retry_after_secs: u64,
}

/// Decides, per key and preset, whether a unit of work may proceed under a
/// sliding window budget shared across the fleet.
///
/// All collaborators are injected; construct one limiter at the composition
/// root and share it by reference. `evaluate` never fails for operational
/// conditions: store outages degrade to the in-process fallback, and only a
/// caller passing an unregistered preset panics.
pub struct SlidingWindowLimiter {
    registry: ConfigRegistry,
    store: HealthAwareStore,
    stats: Arc<StatsCollector>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    pub fn new(
        registry: ConfigRegistry,
        store: HealthAwareStore,
        stats: Arc<StatsCollector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            store,
            stats,
            clock,
        }
    }

    /// Evaluate one unit of work for `key` under the named preset.
    ///
    /// The only suspension point is the bounded distributed-store attempt,
    /// so the returned future resolves within the attempt timeout plus
    /// in-memory fallback latency; callers gating a request may still race
    /// it against their own deadline.
    ///
    /// # Panics
    ///
    /// Panics if `preset` is not registered. Presets are validated when the
    /// registry is built, so reaching this at request time is a caller
    /// defect, not an operational condition.
    pub async fn evaluate(&self, key: &str, preset: &str) -> RateLimitDecision {
        let Some(config) = self.registry.get(preset) else {
            panic!("unknown rate limit preset `{preset}`");
        };

        let now_ms = self.clock.now_ms();
        trace!(key, preset, now_ms, "Evaluating admission");

        let routed = self
            .store
            .try_admit(key, now_ms, config.window_size_ms, config.max_requests)
            .await;

        let decision = build_decision(&config, now_ms, &routed.admission);
        self.stats
            .record(decision.allowed, routed.source, routed.primary_failed);

        if !decision.allowed {
            debug!(
                key,
                preset,
                current = decision.current,
                limit = decision.limit,
                retry_after_secs = decision.retry_after_secs,
                "Rate limit exceeded"
            );
        }
        decision
    }

    /// The shared stats collector (for the flush task and introspection).
    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.stats
    }

    /// The composed store (for wiring maintenance tasks).
    pub fn store(&self) -> &HealthAwareStore {
        &self.store
    }
}

fn build_decision(
    config: &RateLimitConfig,
    now_ms: i64,
    admission: &Admission,
) -> RateLimitDecision {
    let limit = config.max_requests;
    let window_ms = config.window_size_ms as i64;

    match *admission {
        Admission::Allowed { current, oldest_ms } => RateLimitDecision {
            allowed: true,
            current,
            limit,
            remaining: limit.saturating_sub(current),
            reset_time: oldest_ms + window_ms,
            retry_after_secs: 0,
        },
        Admission::Limited { current, oldest_ms } => {
            let reset_time = oldest_ms.unwrap_or(now_ms) + window_ms;
            RateLimitDecision {
                allowed: false,
                current,
                limit,
                remaining: limit.saturating_sub(current),
                reset_time,
                retry_after_secs: ceil_secs(reset_time - now_ms),
            }
        }
        // Fallback store saturated and the key is untracked: criticality
        // picks the failure direction. Counts are best-effort here.
        Admission::Untracked => {
            if config.critical {
                RateLimitDecision {
                    allowed: false,
                    current: limit,
                    limit,
                    remaining: 0,
                    reset_time: now_ms + window_ms,
                    retry_after_secs: ceil_secs(window_ms),
                }
            } else {
                RateLimitDecision {
                    allowed: true,
                    current: 0,
                    limit,
                    remaining: limit,
                    reset_time: now_ms + window_ms,
                    retry_after_secs: 0,
                }
            }
        }
    }
}

fn ceil_secs(ms: i64) -> u64 {
    if ms <= 0 {
        0
    } else {
        // Equivalent to `ms.div_ceil(1000)`, which is unstable for signed
        // integers; `ms > 0` here so the manual ceiling is exact.
        ((ms + 999) / 1000) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::health::HealthMonitor;
    use crate::store::testing::{FailingStore, FakeDistributedStore};
    use crate::store::{MemoryWindowStore, WindowStore};
    use std::time::Duration;

    fn presets() -> ConfigRegistry {
        ConfigRegistry::from_presets([
            (
                "api",
                RateLimitConfig {
                    window_size_ms: 60_000,
                    max_requests: 5,
                    critical: false,
                },
            ),
            (
                "login",
                RateLimitConfig {
                    window_size_ms: 60_000,
                    max_requests: 5,
                    critical: true,
                },
            ),
        ])
        .unwrap()
    }

    fn limiter_with(
        primary: Arc<dyn WindowStore>,
        fallback: Arc<MemoryWindowStore>,
        clock: Arc<ManualClock>,
    ) -> SlidingWindowLimiter {
        let store = HealthAwareStore::with_timeout(
            primary,
            fallback,
            Arc::new(HealthMonitor::with_refresh_interval(Duration::from_secs(3))),
            Duration::from_millis(50),
        );
        SlidingWindowLimiter::new(presets(), store, Arc::new(StatsCollector::new()), clock)
    }

    fn distributed_limiter(clock: Arc<ManualClock>) -> SlidingWindowLimiter {
        limiter_with(
            Arc::new(FakeDistributedStore::default()),
            Arc::new(MemoryWindowStore::new()),
            clock,
        )
    }

    #[tokio::test]
    async fn test_window_scenario() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = distributed_limiter(clock.clone());

        // Five admissions drain the budget in order.
        for expected_remaining in [4, 3, 2, 1, 0] {
            let decision = limiter.evaluate("A", "api").await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
            assert_eq!(decision.retry_after_secs, 0);
        }

        // The sixth is rejected and told to come back once the window turns.
        let decision = limiter.evaluate("A", "api").await;
        assert!(!decision.allowed);
        assert_eq!(decision.current, 5);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after_secs, 60);
        assert_eq!(decision.reset_time, 60_000);

        // Just past the window, the key starts fresh.
        clock.set(60_001);
        let decision = limiter.evaluate("A", "api").await;
        assert!(decision.allowed);
        assert_eq!(decision.current, 1);
    }

    #[tokio::test]
    async fn test_scenario_holds_on_fallback_store() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter_with(
            Arc::new(FailingStore::default()),
            Arc::new(MemoryWindowStore::new()),
            clock.clone(),
        );

        for expected_remaining in [4, 3, 2, 1, 0] {
            let decision = limiter.evaluate("A", "api").await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }
        let decision = limiter.evaluate("A", "api").await;
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_secs, 60);

        clock.set(60_001);
        let decision = limiter.evaluate("A", "api").await;
        assert!(decision.allowed);
        assert_eq!(decision.current, 1);
    }

    #[tokio::test]
    async fn test_failover_continuity_and_stats() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter_with(
            Arc::new(FailingStore::default()),
            Arc::new(MemoryWindowStore::new()),
            clock.clone(),
        );

        // Every call gets a decision; none hang or escape as errors.
        for i in 0..10 {
            clock.set(i);
            let decision = limiter.evaluate("A", "api").await;
            assert_eq!(decision.limit, 5);
        }

        let snapshot = limiter.stats().snapshot();
        assert_eq!(snapshot.total_requests, 10);
        assert_eq!(snapshot.blocked_requests, 5);
        assert_eq!(snapshot.fallback_usage, 10);
        // Only the initial attempt hit the store; the health gate absorbed
        // the rest of the outage (the manual clock stays inside one refresh
        // interval).
        assert_eq!(snapshot.backend_errors, 1);
    }

    #[tokio::test]
    async fn test_critical_preset_fails_closed_at_capacity() {
        let clock = Arc::new(ManualClock::new(0));
        let fallback = Arc::new(MemoryWindowStore::with_capacity(1));
        let limiter = limiter_with(Arc::new(FailingStore::default()), fallback, clock);

        // Occupy the only slot.
        assert!(limiter.evaluate("tracked", "login").await.allowed);

        let decision = limiter.evaluate("net-new", "login").await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after_secs, 60);

        // The tracked key is still served below its own limit.
        assert!(limiter.evaluate("tracked", "login").await.allowed);
    }

    #[tokio::test]
    async fn test_noncritical_preset_fails_open_at_capacity() {
        let clock = Arc::new(ManualClock::new(0));
        let fallback = Arc::new(MemoryWindowStore::with_capacity(1));
        let limiter = limiter_with(Arc::new(FailingStore::default()), fallback, clock);

        assert!(limiter.evaluate("tracked", "api").await.allowed);

        let decision = limiter.evaluate("net-new", "api").await;
        assert!(decision.allowed);
        assert_eq!(decision.current, 0);
        assert_eq!(decision.remaining, 5);
    }

    #[tokio::test]
    async fn test_boundary_entry_excluded() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = distributed_limiter(clock.clone());

        for _ in 0..5 {
            limiter.evaluate("A", "api").await;
        }

        // At exactly now - window the t=0 entries are expired.
        clock.set(60_000);
        let decision = limiter.evaluate("A", "api").await;
        assert!(decision.allowed);
        assert_eq!(decision.current, 1);
    }

    #[tokio::test]
    async fn test_rejections_do_not_extend_window() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = distributed_limiter(clock.clone());

        for _ in 0..5 {
            limiter.evaluate("A", "api").await;
        }

        // A stream of over-budget attempts deep into the window.
        for t in (1_000..60_000).step_by(10_000) {
            clock.set(t);
            assert!(!limiter.evaluate("A", "api").await.allowed);
        }

        // Admission resumes when the original entries age out, not later.
        clock.set(60_001);
        assert!(limiter.evaluate("A", "api").await.allowed);
    }

    #[tokio::test]
    async fn test_retry_after_tracks_oldest_entry() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = distributed_limiter(clock.clone());

        for _ in 0..5 {
            limiter.evaluate("A", "api").await;
        }

        clock.set(12_400);
        let decision = limiter.evaluate("A", "api").await;
        assert!(!decision.allowed);
        // Oldest entry at t=0 expires at t=60000: 47.6s away, rounded up.
        assert_eq!(decision.retry_after_secs, 48);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = distributed_limiter(clock);

        for _ in 0..5 {
            assert!(limiter.evaluate("A", "api").await.allowed);
        }
        assert!(!limiter.evaluate("A", "api").await.allowed);
        assert!(limiter.evaluate("B", "api").await.allowed);
    }

    #[tokio::test]
    #[should_panic(expected = "unknown rate limit preset")]
    async fn test_unknown_preset_panics() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = distributed_limiter(clock);
        limiter.evaluate("A", "no-such-preset").await;
    }
}
