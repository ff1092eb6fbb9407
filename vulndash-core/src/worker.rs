//! Fixed-size pool of executors pulling from the work queue.
//!
//! Each executor owns one unit at a time and runs the controller to
//! completion; cancellation is only observed between units, so `stop` lets
//! in-flight scans finish. The grace period is one deadline shared by every
//! executor; whatever is still running when it passes is aborted.

use std::{fmt, sync::Arc};

use tokio::{sync::Mutex, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::WorkerConfig,
    controller::ScanController,
    error::{Result, VulnError},
    job::ScanJobStatus,
    queue::{JobQueue, WorkItem},
};

#[derive(Default)]
struct PoolState {
    shutdown: Option<CancellationToken>,
    handles: Vec<JoinHandle<()>>,
}

pub struct WorkerPool {
    config: WorkerConfig,
    queue: Arc<dyn JobQueue>,
    controller: Arc<ScanController>,
    state: Mutex<PoolState>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn JobQueue>,
        controller: Arc<ScanController>,
    ) -> Self {
        Self {
            config,
            queue,
            controller,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state
            .lock()
            .await
            .shutdown
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    /// Spawn `config.workers` executors. Starting a running pool is an error.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.shutdown.as_ref().is_some_and(|t| !t.is_cancelled()) {
            return Err(VulnError::Internal("worker pool already running".into()));
        }

        let workers = self.config.workers.max(1);
        let shutdown = CancellationToken::new();
        info!(workers, max_attempts = self.config.max_attempts, "starting worker pool");

        for index in 0..workers {
            let executor = Executor {
                index,
                queue: Arc::clone(&self.queue),
                controller: Arc::clone(&self.controller),
                config: self.config.clone(),
                shutdown: shutdown.clone(),
            };
            state.handles.push(tokio::spawn(executor.run()));
        }

        state.shutdown = Some(shutdown);
        Ok(())
    }

    /// Signal every executor and wait for each, up to the grace period.
    pub async fn stop(&self) {
        let (token, handles) = {
            let mut state = self.state.lock().await;
            (state.shutdown.clone(), std::mem::take(&mut state.handles))
        };
        let Some(token) = token else {
            return;
        };

        info!("stopping worker pool");
        token.cancel();

        // One grace period for the whole pool, not per executor.
        let deadline = Instant::now() + self.config.shutdown_grace();
        for mut handle in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Worker task failed: {:?}", e),
                Err(_) => {
                    warn!("Worker task still busy at shutdown deadline, aborting");
                    handle.abort();
                }
            }
        }
        info!("worker pool stopped");
    }
}

struct Executor {
    index: usize,
    queue: Arc<dyn JobQueue>,
    controller: Arc<ScanController>,
    config: WorkerConfig,
    shutdown: CancellationToken,
}

impl Executor {
    async fn run(self) {
        debug!(worker = self.index, "executor started");
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let item = match self.queue.pop().await {
                Ok(Some(item)) => item,
                Ok(None) => {
                    if self.idle().await {
                        break;
                    }
                    continue;
                }
                Err(err) => {
                    warn!(worker = self.index, error = %err, "queue poll failed");
                    if self.idle().await {
                        break;
                    }
                    continue;
                }
            };

            self.process(item).await;
        }
        debug!(worker = self.index, "executor shutting down");
    }

    /// Sleep one poll interval. Returns true when shutdown fired meanwhile.
    async fn idle(&self) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => true,
            _ = tokio::time::sleep(self.config.poll_interval()) => false,
        }
    }

    async fn process(&self, item: WorkItem) {
        let err = match self.controller.run(item.job_id, &item.image).await {
            Ok(outcome) => {
                debug!(
                    worker = self.index,
                    job_id = %item.job_id,
                    status = %outcome.status(),
                    "work item handled"
                );
                return;
            }
            Err(err) => err,
        };

        if err.is_retryable() && item.attempt < self.config.max_attempts {
            warn!(
                job_id = %item.job_id,
                attempt = item.attempt,
                error = %err,
                "infrastructure failure, requeueing"
            );
            match self.queue.push(item.retry()).await {
                Ok(()) => return,
                Err(push) => error!(job_id = %item.job_id, error = %push, "requeue failed"),
            }
        }

        self.abandon(&item, &err).await;
    }

    /// Best-effort ScanFail for a unit that will not be retried.
    async fn abandon(&self, item: &WorkItem, err: &VulnError) {
        error!(job_id = %item.job_id, attempt = item.attempt, error = %err, "giving up on work item");
        if err.is_not_found() {
            return;
        }
        let reason = format!("giving up after {} attempt(s): {err}", item.attempt);
        if let Err(mark) = self
            .controller
            .ledger()
            .update_status(item.job_id, ScanJobStatus::ScanFail, Some(reason))
            .await
        {
            warn!(job_id = %item.job_id, error = %mark, "could not mark abandoned job failed");
        }
    }
}
