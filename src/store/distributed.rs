//! Redis-backed shared window store.
//!
//! All processes in the fleet converge on the same per-key budget because
//! the prune, count, and conditional append happen inside a single Lua
//! script invocation: no process can observe the count and append on stale
//! information.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::debug;
use uuid::Uuid;

use super::{Admission, StoreError, WindowStore};

/// Atomic prune + count + conditional add over a sorted set keyed by
/// timestamp. Entries with `score <= now - window` are expired (half-open
/// window), and the key's TTL is re-armed to the window size on every
/// admission so abandoned keys expire server-side.
///
/// Returns `{admitted, count_after, oldest_score | -1}`.
const TRY_ADMIT_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)

local admitted = 0
if count < max then
  redis.call('ZADD', key, now, now .. '-' .. ARGV[4])
  redis.call('PEXPIRE', key, window)
  admitted = 1
  count = count + 1
end

local oldest = -1
local head = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if head[2] then
  oldest = tonumber(head[2])
end

return {admitted, count, oldest}
"#;

/// Shared window store reached over the network.
///
/// Connection recovery is delegated to [`ConnectionManager`]; every failure
/// surfaces as [`StoreError::Unavailable`] for the failover layer to absorb.
/// This store never answers with a best-effort guess.
pub struct DistributedWindowStore {
    conn: ConnectionManager,
    script: Script,
}

impl DistributedWindowStore {
    /// Connect to the store at `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self::from_manager(conn))
    }

    /// Build a store over an existing connection manager.
    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self {
            conn,
            script: Script::new(TRY_ADMIT_SCRIPT),
        }
    }
}

#[async_trait]
impl WindowStore for DistributedWindowStore {
    async fn try_admit(
        &self,
        key: &str,
        now_ms: i64,
        window_size_ms: u64,
        max_requests: u32,
    ) -> Result<Admission, StoreError> {
        // Sorted-set members must stay unique for same-millisecond
        // admissions, so each call carries its own member suffix.
        let member_nonce = Uuid::new_v4().to_string();

        let mut conn = self.conn.clone();
        let reply: Vec<i64> = self
            .script
            .key(key)
            .arg(now_ms)
            .arg(window_size_ms)
            .arg(max_requests)
            .arg(member_nonce)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let admission = parse_reply(&reply)?;
        debug!(key, ?admission, "Distributed admission attempt");
        Ok(admission)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

/// Decode the `{admitted, count, oldest}` script reply.
fn parse_reply(reply: &[i64]) -> Result<Admission, StoreError> {
    let [admitted, count, oldest] = reply else {
        return Err(StoreError::Unavailable(format!(
            "unexpected script reply of length {}",
            reply.len()
        )));
    };

    let current = u32::try_from(*count)
        .map_err(|_| StoreError::Unavailable(format!("negative window count {count}")))?;
    let oldest_ms = (*oldest >= 0).then_some(*oldest);

    if *admitted == 1 {
        // An admission always leaves at least its own entry in the set.
        let oldest_ms = oldest_ms.ok_or_else(|| {
            StoreError::Unavailable("admitted entry missing from window".to_string())
        })?;
        Ok(Admission::Allowed { current, oldest_ms })
    } else {
        Ok(Admission::Limited { current, oldest_ms })
    }
}
