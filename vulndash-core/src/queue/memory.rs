use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{JobQueue, WorkItem};
use crate::error::Result;

/// In-process queue for single-node deployments and tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryJobQueue {
    items: Arc<Mutex<VecDeque<WorkItem>>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn push(&self, item: WorkItem) -> Result<()> {
        self.items.lock().await.push_back(item);
        Ok(())
    }

    async fn pop(&self) -> Result<Option<WorkItem>> {
        Ok(self.items.lock().await.pop_front())
    }

    async fn depth(&self) -> Result<u64> {
        Ok(self.items.lock().await.len() as u64)
    }
}
