use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use vulndash_core::{
    JobQueue, KeyValueStore, MemoryJobQueue, MemoryStore, RedisJobQueue, RedisStore,
};

use crate::infra::config::Config;

/// Storage and dispatch backends shared by every component.
#[derive(Clone, Debug)]
pub struct Backends {
    pub store: Arc<dyn KeyValueStore>,
    pub queue: Arc<dyn JobQueue>,
}

impl Backends {
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            queue: Arc::new(MemoryJobQueue::new()),
        }
    }

    /// Connect to Redis when configured. A configured store that cannot be
    /// reached is fatal here, at boot, and nowhere else.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let Some(url) = config.redis_url.as_deref() else {
            warn!("REDIS_URL not set; using in-memory store, jobs and reports will not survive a restart");
            return Ok(Self::in_memory());
        };

        let store = RedisStore::connect(url)
            .await
            .context("failed to initialise Redis store")?;
        let queue = RedisJobQueue::new(store.connection());
        info!("Redis store and work queue ready");

        Ok(Self {
            store: Arc::new(store),
            queue: Arc::new(queue),
        })
    }
}
