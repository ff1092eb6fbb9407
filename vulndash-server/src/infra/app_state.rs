use std::{fmt, sync::Arc};

use vulndash_core::{
    CompletionHook, JobLedger, ReportCache, ScanController, ScanEnqueuer, ScannerAdapter,
    StatusQuery, WorkerPool,
};

use crate::infra::{config::Config, startup::Backends};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub backends: Backends,
    pub enqueuer: Arc<ScanEnqueuer>,
    pub status: StatusQuery,
    pub cache: ReportCache,
    pub workers: Arc<WorkerPool>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    /// Wire every engine component over one set of backends. Nothing is
    /// started; call `workers.start()` once the state is built.
    pub fn new(
        config: Arc<Config>,
        backends: Backends,
        scanner: Arc<dyn ScannerAdapter>,
        hook: Option<Arc<dyn CompletionHook>>,
    ) -> Self {
        let retention = config.engine.retention;
        let ledger = JobLedger::new(backends.store.clone(), retention);
        let cache = ReportCache::new(backends.store.clone(), retention);

        let mut controller = ScanController::new(ledger.clone(), cache.clone(), scanner);
        if let Some(hook) = hook {
            controller = controller.with_completion_hook(hook);
        }

        let workers = WorkerPool::new(
            config.engine.workers.clone(),
            backends.queue.clone(),
            Arc::new(controller),
        );

        Self {
            enqueuer: Arc::new(ScanEnqueuer::new(ledger.clone(), backends.queue.clone())),
            status: StatusQuery::new(ledger),
            cache,
            workers: Arc::new(workers),
            backends,
            config,
        }
    }
}
