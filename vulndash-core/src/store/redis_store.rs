use std::{collections::BTreeSet, fmt, time::Duration};

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use tracing::{debug, info};

use super::{KeyValueStore, StoredValue, ensure_ttl};
use crate::error::{Result, VulnError};

const SCAN_BATCH: usize = 200;

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        info!("Connecting to Redis store");

        let client = redis::Client::open(redis_url)
            .map_err(|e| VulnError::Backend(format!("Failed to create Redis client: {e}")))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| VulnError::Backend(format!("Failed to connect to Redis: {e}")))?;

        let store = Self { conn };
        store.ping().await?;

        info!("Successfully connected to Redis store");
        Ok(store)
    }

    /// Shared connection for other Redis-backed components (the work queue).
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn create(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        ensure_ttl(key, ttl)?;
        debug!("Store CREATE: {} (TTL: {:?})", key, ttl);

        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| VulnError::Backend(format!("Redis SET NX failed: {e}")))?;

        match reply {
            Some(_) => Ok(()),
            None => Err(VulnError::AlreadyExists(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        ensure_ttl(key, ttl)?;
        debug!("Store SET: {} (TTL: {:?})", key, ttl);

        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| VulnError::Backend(format!("Redis SET failed: {e}")))
    }

    async fn get(&self, key: &str) -> Result<StoredValue> {
        let mut conn = self.conn.clone();
        let (value, pttl): (Option<Vec<u8>>, i64) = redis::pipe()
            .atomic()
            .cmd("GET")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| VulnError::Backend(format!("Redis GET failed: {e}")))?;

        match value {
            Some(value) => {
                debug!("Store HIT: {}", key);
                Ok(StoredValue {
                    value,
                    ttl: remaining_ttl(pttl),
                })
            }
            None => {
                debug!("Store MISS: {}", key);
                Err(VulnError::NotFound(key.to_string()))
            }
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<BTreeSet<String>> {
        let pattern = format!("{}*", escape_glob(prefix));
        let mut conn = self.conn.clone();
        let mut found = BTreeSet::new();

        // SCAN rather than KEYS so a large keyspace never blocks the server.
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| VulnError::Backend(format!("Redis SCAN failed: {e}")))?;

            found.extend(keys);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        debug!("Store LIST: {} -> {} keys", prefix, found.len());
        Ok(found)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        debug!("Store DELETE: {}", key);

        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| VulnError::Backend(format!("Redis DEL failed: {e}")))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| VulnError::Backend(format!("Redis PING failed: {e}")))
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// PTTL: -2 missing, -1 persistent.
fn remaining_ttl(pttl: i64) -> Option<Duration> {
    u64::try_from(pttl).ok().map(Duration::from_millis)
}

/// Escape Redis glob metacharacters so a prefix is matched literally.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\' | '^') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
