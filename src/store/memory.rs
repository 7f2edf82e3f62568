//! In-process fallback window store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use super::{Admission, StoreError, WindowStore};

/// Default bound on distinct keys tracked by one process.
const DEFAULT_MAX_TRACKED_KEYS: usize = 10_000;

/// Timestamps for one key, newest at the back.
#[derive(Debug)]
struct KeyWindow {
    entries: VecDeque<i64>,
    /// Last time any admission attempt touched this key.
    last_touched_ms: i64,
    /// Window size seen on the last attempt; the sweep prunes with it.
    window_size_ms: u64,
}

impl KeyWindow {
    /// Drop entries at or before the window start (the window is half-open,
    /// so a timestamp exactly at `window_start_ms` is expired).
    fn prune(&mut self, window_start_ms: i64) {
        while self
            .entries
            .front()
            .is_some_and(|&ts| ts <= window_start_ms)
        {
            self.entries.pop_front();
        }
    }
}

/// Per-process window store used when the distributed store is unreachable.
///
/// The map is sharded by the key hash, so unrelated keys never contend on
/// one lock. The store is bounded: once `max_tracked_keys` distinct keys are
/// live, attempts for net-new keys return [`Admission::Untracked`] instead
/// of growing the map. Keys already tracked are unaffected by the cap and
/// are only released by the sweep once empty and idle past the retention
/// horizon.
pub struct MemoryWindowStore {
    windows: DashMap<String, KeyWindow>,
    tracked: AtomicUsize,
    max_tracked_keys: usize,
}

impl MemoryWindowStore {
    /// Create a store bounded by the default key capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_TRACKED_KEYS)
    }

    /// Create a store bounded by `max_tracked_keys` distinct keys.
    pub fn with_capacity(max_tracked_keys: usize) -> Self {
        Self {
            windows: DashMap::new(),
            tracked: AtomicUsize::new(0),
            max_tracked_keys,
        }
    }

    /// Synchronous admission attempt; the store itself never fails.
    pub fn admit(
        &self,
        key: &str,
        now_ms: i64,
        window_size_ms: u64,
        max_requests: u32,
    ) -> Admission {
        let window_start_ms = now_ms - window_size_ms as i64;

        if max_requests == 0 {
            return Admission::Limited {
                current: 0,
                oldest_ms: None,
            };
        }

        match self.windows.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let window = occupied.get_mut();
                window.prune(window_start_ms);
                window.last_touched_ms = now_ms;
                window.window_size_ms = window_size_ms;

                let current = window.entries.len() as u32;
                if current < max_requests {
                    window.entries.push_back(now_ms);
                    Admission::Allowed {
                        current: current + 1,
                        oldest_ms: window.entries.front().copied().unwrap_or(now_ms),
                    }
                } else {
                    Admission::Limited {
                        current,
                        oldest_ms: window.entries.front().copied(),
                    }
                }
            }
            Entry::Vacant(vacant) => {
                // Claim a capacity slot before materializing the key. The
                // counter update is the admission gate for net-new keys.
                let claimed = self
                    .tracked
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |tracked| {
                        (tracked < self.max_tracked_keys).then_some(tracked + 1)
                    })
                    .is_ok();
                if !claimed {
                    return Admission::Untracked;
                }

                vacant.insert(KeyWindow {
                    entries: VecDeque::from([now_ms]),
                    last_touched_ms: now_ms,
                    window_size_ms,
                });
                Admission::Allowed {
                    current: 1,
                    oldest_ms: now_ms,
                }
            }
        }
    }

    /// Janitor pass: prune expired entries, then release keys that are
    /// empty and untouched for longer than `retention`.
    ///
    /// Returns the number of keys released.
    pub fn sweep(&self, now_ms: i64, retention: Duration) -> usize {
        let retention_ms = retention.as_millis() as i64;
        let mut removed = 0usize;

        self.windows.retain(|_, window| {
            window.prune(now_ms - window.window_size_ms as i64);
            let stale =
                window.entries.is_empty() && now_ms - window.last_touched_ms > retention_ms;
            if stale {
                removed += 1;
            }
            !stale
        });

        if removed > 0 {
            self.tracked.fetch_sub(removed, Ordering::SeqCst);
            info!(removed, remaining = self.windows.len(), "Swept idle keys");
        }
        removed
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

impl Default for MemoryWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn try_admit(
        &self,
        key: &str,
        now_ms: i64,
        window_size_ms: u64,
        max_requests: u32,
    ) -> Result<Admission, StoreError> {
        Ok(self.admit(key, now_ms, window_size_ms, max_requests))
    }
}
