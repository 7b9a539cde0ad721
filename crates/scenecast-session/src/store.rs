//! Distributed session store.
//!
//! Each live protocol session is mirrored as `{metadata:{connectedAt}}`
//! under its id with a renewable TTL so other instances can tell that the
//! session is alive somewhere. The mirror is advisory: a missing store only
//! narrows the server to single-instance tracking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

/// Value stored under a session id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub metadata: SessionMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub connected_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(connected_at: DateTime<Utc>) -> Self {
        Self {
            metadata: SessionMetadata { connected_at },
        }
    }
}

/// Keyed store with per-key TTL.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session_id: &str, record: &SessionRecord, ttl: Duration)
        -> StoreResult<()>;

    async fn get(&self, session_id: &str) -> StoreResult<Option<SessionRecord>>;

    /// Renew the TTL. Returns `false` when the key no longer exists.
    async fn extend(&self, session_id: &str, ttl: Duration) -> StoreResult<bool>;

    async fn delete(&self, session_id: &str) -> StoreResult<()>;

    fn name(&self) -> &'static str;
}

/// Redis-backed store.
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
}

impl RedisSessionStore {
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Session store connected to redis");
        Ok(Self { conn })
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn save(
        &self,
        session_id: &str,
        record: &SessionRecord,
        ttl: Duration,
    ) -> StoreResult<()> {
        let value = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(session_id)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, session_id: &str) -> StoreResult<Option<SessionRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(session_id)
            .query_async(&mut conn)
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn extend(&self, session_id: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let updated: i64 = redis::cmd("EXPIRE")
            .arg(session_id)
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(updated == 1)
    }

    async fn delete(&self, session_id: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(session_id)
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// In-process store with TTL expiry.
///
/// Several session managers can share one instance to behave like separate
/// server instances in front of the same redis.
#[derive(Debug, Default, Clone)]
pub struct MemorySessionStore {
    entries: Arc<DashMap<String, (SessionRecord, Instant)>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(
        &self,
        session_id: &str,
        record: &SessionRecord,
        ttl: Duration,
    ) -> StoreResult<()> {
        self.entries
            .insert(session_id.to_string(), (record.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, session_id: &str) -> StoreResult<Option<SessionRecord>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(session_id) {
            if entry.1 > now {
                return Ok(Some(entry.0.clone()));
            }
        }
        self.entries.remove_if(session_id, |_, (_, expires)| *expires <= now);
        Ok(None)
    }

    async fn extend(&self, session_id: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        match self.entries.get_mut(session_id) {
            Some(mut entry) if entry.1 > now => {
                entry.1 = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, session_id: &str) -> StoreResult<()> {
        self.entries.remove(session_id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Availability-guarded access to an optional store.
///
/// Every call is bounded by `op_timeout`. Failures are swallowed and
/// reported as "absent": the first one is logged as a warning, later ones
/// at debug level.
pub struct StoreHandle {
    store: Option<Arc<dyn SessionStore>>,
    op_timeout: Duration,
    degraded_logged: AtomicBool,
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("store", &self.store.as_ref().map(|s| s.name()))
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

impl StoreHandle {
    pub fn new(store: Arc<dyn SessionStore>, op_timeout: Duration) -> Self {
        Self {
            store: Some(store),
            op_timeout,
            degraded_logged: AtomicBool::new(false),
        }
    }

    /// A handle with no backing store. Sessions are tracked in memory only.
    pub fn unavailable() -> Self {
        Self {
            store: None,
            op_timeout: Duration::ZERO,
            degraded_logged: AtomicBool::new(false),
        }
    }

    pub fn is_available(&self) -> bool {
        self.store.is_some()
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.store.as_ref().map(|s| s.name())
    }

    async fn guarded<T, F>(&self, op: &'static str, session_id: &str, fut: F) -> Option<T>
    where
        F: std::future::Future<Output = StoreResult<T>>,
    {
        let result = match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout { op }),
        };

        match result {
            Ok(value) => Some(value),
            Err(e) => {
                if !self.degraded_logged.swap(true, Ordering::Relaxed) {
                    warn!(op, session_id, error = %e, "session store call failed, continuing without it");
                } else {
                    debug!(op, session_id, error = %e, "session store call failed");
                }
                None
            }
        }
    }

    pub async fn save(&self, session_id: &str, record: &SessionRecord, ttl: Duration) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        self.guarded("save", session_id, store.save(session_id, record, ttl))
            .await
            .is_some()
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionRecord> {
        let store = self.store.as_ref()?;
        self.guarded("get", session_id, store.get(session_id))
            .await
            .flatten()
    }

    pub async fn extend(&self, session_id: &str, ttl: Duration) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        self.guarded("extend", session_id, store.extend(session_id, ttl))
            .await
            .unwrap_or(false)
    }

    pub async fn delete(&self, session_id: &str) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        self.guarded("delete", session_id, store.delete(session_id))
            .await
            .is_some()
    }
}
