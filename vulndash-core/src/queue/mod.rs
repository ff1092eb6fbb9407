//! Work queue: at-least-once hand-off of `(job id, image)` units from the
//! enqueuer to the worker pool.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{error::Result, job::JobId};

mod memory;
#[cfg(feature = "redis")]
mod redis_queue;

pub use memory::MemoryJobQueue;
#[cfg(feature = "redis")]
pub use redis_queue::RedisJobQueue;

/// Redis list backing the shared queue.
pub const SCAN_QUEUE_KEY: &str = "vulndash:queue:scan";

/// One dispatchable unit of work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub job_id: JobId,
    pub image: String,
    /// 1-based delivery count; bumped each time the pool hands the unit back.
    pub attempt: u16,
}

impl WorkItem {
    pub fn new(job_id: JobId, image: impl Into<String>) -> Self {
        Self {
            job_id,
            image: image.into(),
            attempt: 1,
        }
    }

    pub fn retry(&self) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            ..self.clone()
        }
    }
}

/// FIFO queue shared by the enqueuer and every executor.
#[async_trait]
pub trait JobQueue: Send + Sync + fmt::Debug {
    async fn push(&self, item: WorkItem) -> Result<()>;

    /// Non-blocking; `None` when the queue is empty.
    async fn pop(&self) -> Result<Option<WorkItem>>;

    async fn depth(&self) -> Result<u64>;
}
