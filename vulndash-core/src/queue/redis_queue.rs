use std::fmt;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use super::{JobQueue, SCAN_QUEUE_KEY, WorkItem};
use crate::error::{Result, VulnError};

/// Redis list queue: `LPUSH` on enqueue, `RPOP` on dispatch. Polling keeps
/// the shared multiplexed connection free of blocking commands.
#[derive(Clone)]
pub struct RedisJobQueue {
    conn: ConnectionManager,
    key: String,
}

impl fmt::Debug for RedisJobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisJobQueue")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl RedisJobQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self::with_key(conn, SCAN_QUEUE_KEY)
    }

    pub fn with_key(conn: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            conn,
            key: key.into(),
        }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn push(&self, item: WorkItem) -> Result<()> {
        let payload = serde_json::to_vec(&item)?;
        let mut conn = self.conn.clone();
        redis::cmd("LPUSH")
            .arg(&self.key)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| VulnError::Backend(format!("Redis LPUSH failed: {e}")))?;
        debug!(job_id = %item.job_id, attempt = item.attempt, "work item queued");
        Ok(())
    }

    async fn pop(&self) -> Result<Option<WorkItem>> {
        let mut conn = self.conn.clone();
        let payload: Option<Vec<u8>> = redis::cmd("RPOP")
            .arg(&self.key)
            .query_async(&mut conn)
            .await
            .map_err(|e| VulnError::Backend(format!("Redis RPOP failed: {e}")))?;

        payload.map(|bytes| decode_item(&self.key, &bytes)).transpose()
    }

    async fn depth(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        redis::cmd("LLEN")
            .arg(&self.key)
            .query_async(&mut conn)
            .await
            .map_err(|e| VulnError::Backend(format!("Redis LLEN failed: {e}")))
    }
}

/// RPOP has already removed the payload, so an undecodable item is logged
/// verbatim; its job stays Queued until the ledger entry expires.
fn decode_item(key: &str, bytes: &[u8]) -> Result<WorkItem> {
    serde_json::from_slice(bytes).map_err(|e| {
        let raw = String::from_utf8_lossy(bytes);
        warn!(queue = key, payload = %raw, error = %e, "dropping undecodable work item");
        VulnError::corrupt(key, format!("{e}; payload: {raw}"))
    })
}
