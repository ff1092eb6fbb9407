//! Job ledger: one short-lived record per scan job.
//!
//! Updates are get-modify-set against the keyed store and are not atomic.
//! That is acceptable because a job id is driven by exactly one executor.

use std::{fmt, sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::{
    config::RetentionConfig,
    error::{Result, VulnError},
    job::{JobId, ScanJob, ScanJobStatus},
    report::Report,
    store::KeyValueStore,
};

pub const JOB_KEY_PREFIX: &str = "vulndash:scan-job:";

pub fn job_key(id: JobId) -> String {
    format!("{JOB_KEY_PREFIX}{id}")
}

/// Live jobs plus how many records could not be read.
#[derive(Clone, Debug, Default)]
pub struct JobListing {
    pub jobs: Vec<ScanJob>,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct JobLedger {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl fmt::Debug for JobLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobLedger")
            .field("store", &self.store)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl JobLedger {
    pub fn new(store: Arc<dyn KeyValueStore>, retention: RetentionConfig) -> Self {
        Self {
            store,
            ttl: retention.job_ttl(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record a new job. Fails if an entry for the id is already live.
    pub async fn create(&self, job: &ScanJob) -> Result<()> {
        let bytes = serde_json::to_vec(job)?;
        self.store.create(&job_key(job.id), bytes, self.ttl).await?;
        debug!(job_id = %job.id, image = %job.image, "job recorded");
        Ok(())
    }

    pub async fn get(&self, id: JobId) -> Result<ScanJob> {
        let key = job_key(id);
        let stored = self.store.get(&key).await?;
        serde_json::from_slice(&stored.value).map_err(|e| VulnError::corrupt(key, e))
    }

    /// Overwrites the record and resets its TTL.
    async fn put(&self, job: &ScanJob) -> Result<()> {
        let bytes = serde_json::to_vec(job)?;
        self.store.set(&job_key(job.id), bytes, self.ttl).await
    }

    pub async fn update_status(
        &self,
        id: JobId,
        status: ScanJobStatus,
        error: Option<String>,
    ) -> Result<ScanJob> {
        let mut job = self.get(id).await?;
        let from = job.status;
        job.transition(status, error)?;
        self.put(&job).await?;
        debug!(job_id = %id, %from, to = %status, "job status updated");
        Ok(job)
    }

    /// Embed the report and mark the job Scanned in a single write.
    pub async fn attach_report(&self, id: JobId, report: Report) -> Result<ScanJob> {
        let mut job = self.get(id).await?;
        job.transition(ScanJobStatus::Scanned, None)?;
        job.report = Some(report);
        self.put(&job).await?;
        Ok(job)
    }

    /// Every live job. Records that vanish between listing and reading, or
    /// fail to decode, are skipped so one bad entry cannot hide the rest.
    pub async fn list_jobs(&self) -> Result<JobListing> {
        let keys = self.store.list_keys(JOB_KEY_PREFIX).await?;
        let mut listing = JobListing::default();

        for key in keys {
            let stored = match self.store.get(&key).await {
                Ok(stored) => stored,
                Err(VulnError::NotFound(_)) => {
                    debug!(%key, "job expired while listing");
                    continue;
                }
                Err(err) => return Err(err),
            };

            match serde_json::from_slice::<ScanJob>(&stored.value) {
                Ok(job) => listing.jobs.push(job),
                Err(err) => {
                    warn!(%key, error = %err, "skipping undecodable job record");
                    listing.skipped += 1;
                }
            }
        }

        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        report::{ScanTarget, Severity, Vulnerability},
        store::MemoryStore,
    };

    fn ledger() -> (JobLedger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (
            JobLedger::new(store.clone(), RetentionConfig::default()),
            store,
        )
    }

    #[tokio::test]
    async fn create_then_get_reports_queued() {
        let (ledger, _) = ledger();
        let job = ScanJob::queued(JobId::new(), "alpine:3.18", None);
        ledger.create(&job).await.expect("create");

        let stored = ledger.get(job.id).await.expect("get");
        assert_eq!(stored.status, ScanJobStatus::Queued);
        assert_eq!(stored.image, "alpine:3.18");
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let (ledger, _) = ledger();
        let job = ScanJob::queued(JobId::new(), "alpine:3.18", None);
        ledger.create(&job).await.expect("create");
        assert!(matches!(
            ledger.create(&job).await,
            Err(VulnError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn status_never_regresses() {
        let (ledger, _) = ledger();
        let job = ScanJob::queued(JobId::new(), "alpine:3.18", None);
        ledger.create(&job).await.expect("create");

        ledger
            .update_status(job.id, ScanJobStatus::Pending, None)
            .await
            .expect("pending");
        let err = ledger
            .update_status(job.id, ScanJobStatus::Queued, None)
            .await
            .expect_err("regression");
        assert!(matches!(err, VulnError::InvalidTransition { .. }));
        assert_eq!(
            ledger.get(job.id).await.expect("get").status,
            ScanJobStatus::Pending
        );
    }

    #[tokio::test]
    async fn attach_report_marks_scanned() {
        let (ledger, _) = ledger();
        let job = ScanJob::queued(JobId::new(), "alpine:3.18", None);
        ledger.create(&job).await.expect("create");

        let report = Report::new(vec![ScanTarget::new(
            "alpine:3.18 (alpine 3.18.0)",
            vec![Vulnerability::new("CVE-1", Severity::Low)],
        )]);
        let updated = ledger
            .attach_report(job.id, report.clone())
            .await
            .expect("attach");
        assert_eq!(updated.status, ScanJobStatus::Scanned);
        assert_eq!(ledger.get(job.id).await.expect("get").report, Some(report));
    }

    #[tokio::test]
    async fn list_skips_corrupt_records() {
        let (ledger, store) = ledger();
        for image in ["a:1", "b:2"] {
            ledger
                .create(&ScanJob::queued(JobId::new(), image, None))
                .await
                .expect("create");
        }
        store
            .set(
                &job_key(JobId::new()),
                b"{not json".to_vec(),
                Duration::from_secs(60),
            )
            .await
            .expect("seed corrupt");

        let listing = ledger.list_jobs().await.expect("list");
        assert_eq!(listing.jobs.len(), 2);
        assert_eq!(listing.skipped, 1);
    }

    #[tokio::test]
    async fn get_on_corrupt_record_is_corrupt() {
        let (ledger, store) = ledger();
        let id = JobId::new();
        store
            .set(&job_key(id), b"[]".to_vec(), Duration::from_secs(60))
            .await
            .expect("seed");
        assert!(matches!(
            ledger.get(id).await,
            Err(VulnError::Corrupt { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_the_job_window() {
        let (ledger, _) = ledger();
        let job = ScanJob::queued(JobId::new(), "alpine:3.18", None);
        ledger.create(&job).await.expect("create");

        tokio::time::advance(ledger.ttl() + Duration::from_secs(1)).await;

        assert!(ledger.get(job.id).await.expect_err("expired").is_not_found());
    }
}
