//! Best-effort response cache: Redis when reachable, process memory always.
//!
//! Lifecycle is `init -> Ready | Degraded | MemoryOnly -> ... -> teardown`.
//! No operation returns an error and every Redis round trip is bounded by
//! [`CachePolicy::op_timeout`]. After a Redis failure the cache stays
//! degraded until `retry_after`, then reconnects on the next call.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisResult};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub op_timeout: Duration,
    pub reconnect_backoff: Duration,
    pub key_prefix: String,
    pub max_local_entries: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_millis(150),
            reconnect_backoff: Duration::from_secs(30),
            key_prefix: "cbj".to_string(),
            max_local_entries: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Ready,
    Degraded,
    MemoryOnly,
}

#[derive(Default)]
struct External {
    conn: Option<MultiplexedConnection>,
    retry_after: Option<Instant>,
}

struct LocalEntry {
    value: String,
    expires_at: Instant,
}

pub struct ResponseCache {
    client: Option<redis::Client>,
    external: Mutex<External>,
    local: Mutex<HashMap<String, LocalEntry>>,
    policy: CachePolicy,
}

async fn redis_get(conn: &mut MultiplexedConnection, key: &str) -> RedisResult<Option<String>> {
    conn.get(key).await
}

async fn redis_set(
    conn: &mut MultiplexedConnection,
    key: &str,
    value: &str,
    ttl_secs: u64,
) -> RedisResult<()> {
    conn.set_ex(key, value, ttl_secs).await
}

async fn redis_del(conn: &mut MultiplexedConnection, key: &str) -> RedisResult<()> {
    conn.del(key).await
}

impl ResponseCache {
    /// Process-local cache with no external backend.
    pub fn memory_only(policy: CachePolicy) -> Self {
        Self {
            client: None,
            external: Mutex::new(External::default()),
            local: Mutex::new(HashMap::new()),
            policy,
        }
    }

    pub async fn init(redis_url: Option<&str>, policy: CachePolicy) -> Self {
        let Some(url) = redis_url.filter(|u| !u.trim().is_empty()) else {
            return Self::memory_only(policy);
        };
        let client = match redis::Client::open(url) {
            Ok(client) => client,
            Err(err) => {
                warn!(error = %err, "invalid REDIS_URL; response cache is memory-only");
                return Self::memory_only(policy);
            }
        };
        let cache = Self {
            client: Some(client),
            external: Mutex::new(External::default()),
            local: Mutex::new(HashMap::new()),
            policy,
        };
        let _ = cache.connection().await;
        cache
    }

    pub async fn state(&self) -> CacheState {
        if self.client.is_none() {
            return CacheState::MemoryOnly;
        }
        if self.external.lock().await.conn.is_some() {
            CacheState::Ready
        } else {
            CacheState::Degraded
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{key}", self.policy.key_prefix)
    }

    async fn connection(&self) -> Option<MultiplexedConnection> {
        let client = self.client.as_ref()?;
        let mut external = self.external.lock().await;
        if let Some(conn) = &external.conn {
            return Some(conn.clone());
        }
        if external.retry_after.is_some_and(|at| Instant::now() < at) {
            return None;
        }
        match timeout(self.policy.op_timeout, client.get_multiplexed_async_connection()).await {
            Ok(Ok(conn)) => {
                external.conn = Some(conn.clone());
                external.retry_after = None;
                Some(conn)
            }
            Ok(Err(err)) => {
                warn!(error = %err, "redis unavailable; falling back to memory cache");
                external.retry_after = Some(Instant::now() + self.policy.reconnect_backoff);
                None
            }
            Err(_) => {
                warn!("redis connect timed out; falling back to memory cache");
                external.retry_after = Some(Instant::now() + self.policy.reconnect_backoff);
                None
            }
        }
    }

    async fn mark_degraded(&self, op: &str, reason: &str) {
        debug!(op, reason, "redis operation failed");
        let mut external = self.external.lock().await;
        external.conn = None;
        external.retry_after = Some(Instant::now() + self.policy.reconnect_backoff);
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        if let Some(mut conn) = self.connection().await {
            match timeout(self.policy.op_timeout, redis_get(&mut conn, &self.full_key(key))).await {
                Ok(Ok(Some(value))) => return Some(value),
                Ok(Ok(None)) => {}
                Ok(Err(err)) => self.mark_degraded("get", &err.to_string()).await,
                Err(_) => self.mark_degraded("get", "timeout").await,
            }
        }

        let mut local = self.local.lock().await;
        match local.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                local.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Duration) {
        if let Some(mut conn) = self.connection().await {
            let ttl_secs = ttl.as_secs().max(1);
            match timeout(
                self.policy.op_timeout,
                redis_set(&mut conn, &self.full_key(key), value, ttl_secs),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(err)) => self.mark_degraded("set", &err.to_string()).await,
                Err(_) => self.mark_degraded("set", "timeout").await,
            }
        }

        let now = Instant::now();
        let mut local = self.local.lock().await;
        local.retain(|_, entry| entry.expires_at > now);
        if local.len() >= self.policy.max_local_entries && !local.contains_key(key) {
            let oldest = local
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                local.remove(&oldest);
            }
        }
        local.insert(
            key.to_string(),
            LocalEntry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
    }

    pub async fn invalidate(&self, key: &str) {
        if let Some(mut conn) = self.connection().await {
            match timeout(self.policy.op_timeout, redis_del(&mut conn, &self.full_key(key))).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => self.mark_degraded("del", &err.to_string()).await,
                Err(_) => self.mark_degraded("del", "timeout").await,
            }
        }
        self.local.lock().await.remove(key);
    }

    pub async fn teardown(&self) {
        let mut external = self.external.lock().await;
        external.conn = None;
        external.retry_after = None;
        self.local.lock().await.clear();
    }
}
