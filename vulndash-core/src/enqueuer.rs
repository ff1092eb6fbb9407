//! Accepts scan requests: validate, record the job as Queued, then dispatch.
//!
//! The ledger write comes first so that nothing is ever dispatched without a
//! tracking record.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{
    error::{Result, VulnError},
    job::{JobId, ScanJob, ScanJobStatus},
    ledger::JobLedger,
    queue::{JobQueue, WorkItem},
};

pub const MAX_IMAGE_REF_LEN: usize = 512;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub image: String,
    #[serde(default, alias = "webhook_url", skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,
}

impl ScanRequest {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            webhook: None,
        }
    }

    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.webhook = Some(url.into());
        self
    }

    /// Normalised copy of the request, or `InvalidInput` describing the
    /// first problem found.
    pub fn validate(&self) -> Result<ScanRequest> {
        let image = self.image.trim();
        if image.is_empty() {
            return Err(VulnError::InvalidInput("image reference is empty".into()));
        }
        if image.chars().any(char::is_whitespace) {
            return Err(VulnError::InvalidInput(format!(
                "image reference {image:?} contains whitespace"
            )));
        }
        if image.len() > MAX_IMAGE_REF_LEN {
            return Err(VulnError::InvalidInput(format!(
                "image reference exceeds {MAX_IMAGE_REF_LEN} characters"
            )));
        }

        let webhook = match self.webhook.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => {
                let url = url::Url::parse(raw).map_err(|e| {
                    VulnError::InvalidInput(format!("invalid webhook url {raw:?}: {e}"))
                })?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(VulnError::InvalidInput(format!(
                        "webhook url must use http or https, got {}",
                        url.scheme()
                    )));
                }
                Some(url.to_string())
            }
        };

        Ok(ScanRequest {
            image: image.to_string(),
            webhook,
        })
    }
}

pub struct ScanEnqueuer {
    ledger: JobLedger,
    queue: Arc<dyn JobQueue>,
    closed: AtomicBool,
}

impl fmt::Debug for ScanEnqueuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanEnqueuer")
            .field("queue", &self.queue)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl ScanEnqueuer {
    pub fn new(ledger: JobLedger, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            ledger,
            queue,
            closed: AtomicBool::new(false),
        }
    }

    pub async fn enqueue(&self, request: ScanRequest) -> Result<ScanJob> {
        if self.is_closed() {
            return Err(VulnError::Cancelled(
                "scan queue is shutting down and not accepting work".into(),
            ));
        }
        let request = request.validate()?;

        let job = ScanJob::queued(JobId::new(), request.image, request.webhook);
        self.ledger.create(&job).await?;

        if let Err(err) = self
            .queue
            .push(WorkItem::new(job.id, job.image.clone()))
            .await
        {
            error!(job_id = %job.id, error = %err, "dispatch failed after job was recorded");
            let reason = format!("enqueue failed: {err}");
            if let Err(mark) = self
                .ledger
                .update_status(job.id, ScanJobStatus::ScanFail, Some(reason))
                .await
            {
                error!(job_id = %job.id, error = %mark, "could not mark undispatched job failed");
            }
            return Err(err);
        }

        info!(job_id = %job.id, image = %job.image, "scan job enqueued");
        Ok(job)
    }

    /// Stop accepting new work. Already-queued units are unaffected.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("enqueuer closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, time::Duration};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        config::RetentionConfig,
        queue::MemoryJobQueue,
        store::{KeyValueStore, MemoryStore, StoredValue},
    };

    /// Every `create` fails with the configured error; other calls pass through.
    #[derive(Debug)]
    struct RejectingStore {
        inner: MemoryStore,
        reject: fn(&str) -> VulnError,
    }

    #[async_trait]
    impl KeyValueStore for RejectingStore {
        async fn create(&self, key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<()> {
            Err((self.reject)(key))
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
            self.inner.set(key, value, ttl).await
        }

        async fn get(&self, key: &str) -> Result<StoredValue> {
            self.inner.get(key).await
        }

        async fn list_keys(&self, prefix: &str) -> Result<BTreeSet<String>> {
            self.inner.list_keys(prefix).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    fn rejecting(reject: fn(&str) -> VulnError) -> (ScanEnqueuer, JobLedger, Arc<MemoryJobQueue>) {
        let store = Arc::new(RejectingStore {
            inner: MemoryStore::new(),
            reject,
        });
        let ledger = JobLedger::new(store, RetentionConfig::default());
        let queue = Arc::new(MemoryJobQueue::new());
        (ScanEnqueuer::new(ledger.clone(), queue.clone()), ledger, queue)
    }

    #[derive(Debug)]
    struct UnreachableQueue;

    #[async_trait]
    impl JobQueue for UnreachableQueue {
        async fn push(&self, _item: WorkItem) -> Result<()> {
            Err(VulnError::Backend("connection refused".into()))
        }

        async fn pop(&self) -> Result<Option<WorkItem>> {
            Ok(None)
        }

        async fn depth(&self) -> Result<u64> {
            Ok(0)
        }
    }

    fn ledger() -> JobLedger {
        JobLedger::new(Arc::new(MemoryStore::new()), RetentionConfig::default())
    }

    #[tokio::test]
    async fn enqueued_job_is_immediately_queued_and_dispatched() {
        let ledger = ledger();
        let queue = Arc::new(MemoryJobQueue::new());
        let enqueuer = ScanEnqueuer::new(ledger.clone(), queue.clone());

        let job = enqueuer
            .enqueue(ScanRequest::new("alpine:3.18"))
            .await
            .expect("enqueue");

        assert_eq!(
            ledger.get(job.id).await.expect("get").status,
            ScanJobStatus::Queued
        );
        let item = queue.pop().await.expect("pop").expect("dispatched");
        assert_eq!(item.job_id, job.id);
        assert_eq!(item.image, "alpine:3.18");
        assert_eq!(item.attempt, 1);
    }

    #[tokio::test]
    async fn invalid_requests_never_touch_the_ledger() {
        let ledger = ledger();
        let enqueuer = ScanEnqueuer::new(ledger.clone(), Arc::new(MemoryJobQueue::new()));

        for request in [
            ScanRequest::new(""),
            ScanRequest::new("   "),
            ScanRequest::new("alpine 3.18"),
            ScanRequest::new("a".repeat(MAX_IMAGE_REF_LEN + 1)),
            ScanRequest::new("alpine:3.18").with_webhook("ftp://ci/hook"),
            ScanRequest::new("alpine:3.18").with_webhook("not a url"),
        ] {
            let err = enqueuer.enqueue(request).await.expect_err("invalid");
            assert!(matches!(err, VulnError::InvalidInput(_)), "{err}");
        }
        assert!(ledger.list_jobs().await.expect("list").jobs.is_empty());
    }

    #[tokio::test]
    async fn dispatch_failure_marks_job_failed_and_surfaces_error() {
        let ledger = ledger();
        let enqueuer = ScanEnqueuer::new(ledger.clone(), Arc::new(UnreachableQueue));

        let err = enqueuer
            .enqueue(ScanRequest::new("alpine:3.18"))
            .await
            .expect_err("push fails");
        assert!(err.is_retryable());

        let jobs = ledger.list_jobs().await.expect("list").jobs;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, ScanJobStatus::ScanFail);
        assert!(
            jobs[0]
                .error
                .as_deref()
                .unwrap_or_default()
                .contains("connection refused")
        );
    }

    #[tokio::test]
    async fn ledger_backend_failure_dispatches_nothing() {
        let (enqueuer, ledger, queue) =
            rejecting(|_| VulnError::Backend("connection refused".into()));

        let err = enqueuer
            .enqueue(ScanRequest::new("alpine:3.18"))
            .await
            .expect_err("create fails");
        assert!(matches!(err, VulnError::Backend(_)), "{err}");

        assert_eq!(queue.depth().await.expect("depth"), 0);
        assert!(ledger.list_jobs().await.expect("list").jobs.is_empty());
    }

    #[tokio::test]
    async fn existing_ledger_entry_dispatches_nothing() {
        let (enqueuer, ledger, queue) = rejecting(|key| VulnError::AlreadyExists(key.to_string()));

        let err = enqueuer
            .enqueue(ScanRequest::new("alpine:3.18"))
            .await
            .expect_err("duplicate id");
        assert!(matches!(err, VulnError::AlreadyExists(_)), "{err}");

        assert_eq!(queue.depth().await.expect("depth"), 0);
        assert!(ledger.list_jobs().await.expect("list").jobs.is_empty());
    }

    #[tokio::test]
    async fn closed_enqueuer_rejects_work() {
        let enqueuer = ScanEnqueuer::new(ledger(), Arc::new(MemoryJobQueue::new()));
        enqueuer.close();
        assert!(matches!(
            enqueuer.enqueue(ScanRequest::new("alpine:3.18")).await,
            Err(VulnError::Cancelled(_))
        ));
    }

    #[test]
    fn validation_trims_and_keeps_http_webhooks() {
        let request = ScanRequest::new("  nginx:1.25 ")
            .with_webhook("https://ci.example.com/hooks/scan")
            .validate()
            .expect("valid");
        assert_eq!(request.image, "nginx:1.25");
        assert_eq!(
            request.webhook.as_deref(),
            Some("https://ci.example.com/hooks/scan")
        );
    }
}
