//! Window store implementations and the failover policy that composes them.

mod distributed;
mod failover;
mod memory;

pub use distributed::DistributedWindowStore;
pub use failover::{HealthAwareStore, RoutedAdmission, StoreSource};
pub use memory::MemoryWindowStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a window store attempt.
///
/// These are operational conditions, recovered by the failover layer; they
/// never escape [`SlidingWindowLimiter::evaluate`](crate::SlidingWindowLimiter::evaluate).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or the command failed.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store did not answer within the attempt budget.
    #[error("store attempt timed out after {0:?}")]
    Timeout(Duration),
}

/// Outcome of one atomic prune+count+conditional-add operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The unit of work was admitted and now occupies a window slot.
    Allowed {
        /// Entries in the window after the append, this one included.
        current: u32,
        /// Timestamp of the oldest entry in the window.
        oldest_ms: i64,
    },
    /// The window is at its budget; nothing was appended.
    Limited {
        /// Entries currently in the window.
        current: u32,
        /// Timestamp of the oldest entry, which bounds the retry horizon.
        oldest_ms: Option<i64>,
    },
    /// The fallback store is at its key capacity and this key is net-new.
    ///
    /// The fail-open/fail-closed policy for this case belongs to the
    /// limiter, not the store.
    Untracked,
}

/// The atomic sliding-window admission contract.
///
/// Implementations prune entries with `timestamp <= now - window` (the
/// window is the half-open interval `(now - window, now]`), count the
/// survivors, and append `now` only when the count is below the budget.
/// Prune, count, and append must be atomic with respect to concurrent
/// callers for the same key.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Attempt to admit one unit of work for `key` at `now_ms`.
    async fn try_admit(
        &self,
        key: &str,
        now_ms: i64,
        window_size_ms: u64,
        max_requests: u32,
    ) -> Result<Admission, StoreError>;

    /// Lightweight liveness check, used by the scheduled health probe.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
