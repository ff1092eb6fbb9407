//! Scan controller: drives one job from the adapter call to a terminal state.
//!
//! ```text
//! Pending -> scan -> attach report (Scanned) -> re-read -> publish -> hook -> Done
//! ```
//!
//! Every failure inside the sequence, including a panic, is recorded as
//! `ScanFail` on the job. `run` itself only errors when the ledger cannot be
//! reached to record that outcome.

use std::{any::Any, fmt, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    cache::ReportCache,
    error::{Result, VulnError},
    job::{JobId, ScanJob, ScanJobStatus},
    ledger::JobLedger,
    report::{Report, RepositoryKey},
    scanner::ScannerAdapter,
};

/// Invoked after a report is published for jobs that carry a webhook target.
/// An error moves the job to `WebhookFail`.
///
/// Delivery runs inside the controller, before `Done` is written, so a job
/// with a failing hook never reaches `Done`. Without a hook the controller
/// goes straight to `Done` and callers may deliver on their own afterwards.
#[async_trait]
pub trait CompletionHook: Send + Sync + fmt::Debug {
    async fn on_complete(&self, job: &ScanJob, report: &Report) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed {
        repository: RepositoryKey,
        vulnerabilities: u64,
    },
    ScanFailed {
        reason: String,
    },
    WebhookFailed {
        reason: String,
    },
    /// The job was already terminal; nothing was done.
    Skipped {
        status: ScanJobStatus,
    },
}

impl ScanOutcome {
    pub fn status(&self) -> ScanJobStatus {
        match self {
            ScanOutcome::Completed { .. } => ScanJobStatus::Done,
            ScanOutcome::ScanFailed { .. } => ScanJobStatus::ScanFail,
            ScanOutcome::WebhookFailed { .. } => ScanJobStatus::WebhookFail,
            ScanOutcome::Skipped { status } => *status,
        }
    }
}

/// Distinguishes adapter failures from everything else in the sequence so the
/// recorded error text is the adapter's own message.
enum StepError {
    Scan(String),
    Engine(VulnError),
}

impl From<VulnError> for StepError {
    fn from(err: VulnError) -> Self {
        StepError::Engine(err)
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::Scan(message) => f.write_str(message),
            StepError::Engine(err) => write!(f, "{err}"),
        }
    }
}

#[derive(Clone)]
pub struct ScanController {
    ledger: JobLedger,
    cache: ReportCache,
    scanner: Arc<dyn ScannerAdapter>,
    hook: Option<Arc<dyn CompletionHook>>,
}

impl fmt::Debug for ScanController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanController")
            .field("ledger", &self.ledger)
            .field("cache", &self.cache)
            .field("hook", &self.hook)
            .finish_non_exhaustive()
    }
}

impl ScanController {
    pub fn new(ledger: JobLedger, cache: ReportCache, scanner: Arc<dyn ScannerAdapter>) -> Self {
        Self {
            ledger,
            cache,
            scanner,
            hook: None,
        }
    }

    pub fn with_completion_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn ledger(&self) -> &JobLedger {
        &self.ledger
    }

    pub fn cache(&self) -> &ReportCache {
        &self.cache
    }

    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn run(&self, id: JobId, image: &str) -> Result<ScanOutcome> {
        let job = self.ledger.get(id).await?;
        if job.status.is_terminal() {
            debug!(status = %job.status, "job already finished, skipping");
            return Ok(ScanOutcome::Skipped { status: job.status });
        }

        info!(image, "starting scan");
        let attempt = AssertUnwindSafe(self.execute(job, image))
            .catch_unwind()
            .await;

        let reason = match attempt {
            Ok(Ok(outcome)) => return Ok(outcome),
            Ok(Err(err)) => err.to_string(),
            Err(payload) => format!("scan panicked: {}", panic_message(payload.as_ref())),
        };

        warn!(image, %reason, "scan failed");
        match self
            .ledger
            .update_status(id, ScanJobStatus::ScanFail, Some(reason.clone()))
            .await
        {
            Ok(_) => Ok(ScanOutcome::ScanFailed { reason }),
            Err(err) => {
                error!(error = %err, "could not record scan failure");
                Err(err)
            }
        }
    }

    async fn execute(&self, job: ScanJob, image: &str) -> std::result::Result<ScanOutcome, StepError> {
        let id = job.id;
        // A retried unit may already be past Pending.
        if job.status != ScanJobStatus::Scanned {
            self.ledger
                .update_status(id, ScanJobStatus::Pending, None)
                .await?;
        }

        let report = self
            .scanner
            .scan(image)
            .await
            .map_err(|failure| StepError::Scan(failure.message))?;

        self.ledger.attach_report(id, report).await?;
        info!(status = %ScanJobStatus::Scanned, "vulnerability report stored on job");

        let job = self.ledger.get(id).await?;
        let report = match (&job.status, &job.report) {
            (ScanJobStatus::Scanned, Some(report)) => report,
            (status, _) => {
                return Err(VulnError::Internal(format!(
                    "job {id} read back as {status} without its report"
                ))
                .into());
            }
        };

        let repository = self.cache.publish(report).await?;

        if job.webhook.is_some() {
            match &self.hook {
                Some(hook) => {
                    if let Err(err) = hook.on_complete(&job, report).await {
                        let reason = err.to_string();
                        warn!(%reason, "completion hook failed");
                        self.ledger
                            .update_status(id, ScanJobStatus::WebhookFail, Some(reason.clone()))
                            .await?;
                        return Ok(ScanOutcome::WebhookFailed { reason });
                    }
                }
                None => debug!("job has a webhook target but no completion hook is configured"),
            }
        }

        let vulnerabilities = report.total_vulnerabilities();
        self.ledger
            .update_status(id, ScanJobStatus::Done, None)
            .await?;
        info!(%repository, vulnerabilities, "scan done");

        Ok(ScanOutcome::Completed {
            repository,
            vulnerabilities,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        config::RetentionConfig,
        report::{ScanTarget, Severity, Vulnerability},
        scanner::{MockScannerAdapter, ScanFailure},
        store::{KeyValueStore, MemoryStore},
    };

    fn alpine_report() -> Report {
        Report::new(vec![ScanTarget::new(
            "alpine:3.18 (alpine 3.18.0)",
            [Severity::Critical, Severity::High, Severity::High, Severity::Low]
                .into_iter()
                .enumerate()
                .map(|(i, s)| Vulnerability::new(format!("CVE-2023-{i}"), s))
                .collect(),
        )])
    }

    fn controller(scanner: impl ScannerAdapter + 'static) -> (ScanController, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let retention = RetentionConfig::default();
        let controller = ScanController::new(
            JobLedger::new(store.clone(), retention),
            ReportCache::new(store.clone(), retention),
            Arc::new(scanner),
        );
        (controller, store)
    }

    async fn queued(controller: &ScanController, image: &str, webhook: Option<&str>) -> JobId {
        let job = ScanJob::queued(JobId::new(), image, webhook.map(str::to_string));
        controller.ledger().create(&job).await.expect("create");
        job.id
    }

    struct PanickingScanner;

    #[async_trait]
    impl ScannerAdapter for PanickingScanner {
        async fn scan(&self, _image: &str) -> std::result::Result<Report, ScanFailure> {
            panic!("scanner exploded")
        }
    }

    #[derive(Debug, Default)]
    struct RecordingHook {
        fail: bool,
        seen: Mutex<Vec<JobId>>,
    }

    #[async_trait]
    impl CompletionHook for RecordingHook {
        async fn on_complete(&self, job: &ScanJob, _report: &Report) -> Result<()> {
            self.seen.lock().expect("lock").push(job.id);
            if self.fail {
                return Err(VulnError::Backend("webhook returned 503".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn successful_scan_ends_done_and_publishes() {
        let mut scanner = MockScannerAdapter::new();
        scanner
            .expect_scan()
            .withf(|image| image == "alpine:3.18")
            .times(1)
            .returning(|_| Ok(alpine_report()));
        let (controller, _) = controller(scanner);
        let id = queued(&controller, "alpine:3.18", None).await;

        let outcome = controller.run(id, "alpine:3.18").await.expect("run");
        assert_eq!(outcome.status(), ScanJobStatus::Done);

        let job = controller.ledger().get(id).await.expect("job");
        assert_eq!(job.status, ScanJobStatus::Done);
        assert_eq!(job.vulnerabilities_found(), 4);

        let repo = RepositoryKey::parse("alpine:3.18").expect("key");
        let summary = controller.cache().get_summary(&repo).await.expect("summary");
        assert_eq!(summary.counts.get(Severity::Critical), 1);
        assert_eq!(summary.counts.get(Severity::High), 2);
        assert_eq!(summary.counts.get(Severity::Low), 1);
    }

    #[tokio::test]
    async fn adapter_failure_is_terminal_scan_fail_without_cache_entry() {
        let mut scanner = MockScannerAdapter::new();
        scanner.expect_scan().times(1).returning(|_| {
            Err(ScanFailure::new("no such image: bad/image").with_exit_code(Some(1)))
        });
        let (controller, store) = controller(scanner);
        let id = queued(&controller, "bad/image", None).await;

        let outcome = controller.run(id, "bad/image").await.expect("run");
        assert!(matches!(outcome, ScanOutcome::ScanFailed { .. }));

        let job = controller.ledger().get(id).await.expect("job");
        assert_eq!(job.status, ScanJobStatus::ScanFail);
        assert!(job.error.as_deref().unwrap_or_default().contains("no such image"));
        assert!(
            store
                .list_keys(crate::cache::REPORT_KEY_PREFIX)
                .await
                .expect("list")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn adapter_panic_is_recorded_as_scan_fail() {
        let (controller, _) = controller(PanickingScanner);
        let id = queued(&controller, "alpine:3.18", None).await;

        let outcome = controller.run(id, "alpine:3.18").await.expect("run");
        assert_eq!(outcome.status(), ScanJobStatus::ScanFail);

        let job = controller.ledger().get(id).await.expect("job");
        assert!(job.error.as_deref().unwrap_or_default().contains("scanner exploded"));
    }

    #[tokio::test]
    async fn report_without_repository_key_fails_the_job() {
        let mut scanner = MockScannerAdapter::new();
        scanner.expect_scan().returning(|_| Ok(Report::default()));
        let (controller, _) = controller(scanner);
        let id = queued(&controller, "scratch", None).await;

        let outcome = controller.run(id, "scratch").await.expect("run");
        assert_eq!(outcome.status(), ScanJobStatus::ScanFail);
        let job = controller.ledger().get(id).await.expect("job");
        assert!(job.error.as_deref().unwrap_or_default().contains("no scan targets"));
    }

    #[tokio::test]
    async fn hook_runs_only_for_jobs_with_a_webhook() {
        let mut scanner = MockScannerAdapter::new();
        scanner.expect_scan().times(2).returning(|_| Ok(alpine_report()));
        let (controller, _) = controller(scanner);
        let hook = Arc::new(RecordingHook::default());
        let controller = controller.with_completion_hook(hook.clone());

        let plain = queued(&controller, "alpine:3.18", None).await;
        let hooked = queued(&controller, "alpine:3.18", Some("http://ci/hook")).await;
        controller.run(plain, "alpine:3.18").await.expect("plain");
        controller.run(hooked, "alpine:3.18").await.expect("hooked");

        assert_eq!(*hook.seen.lock().expect("lock"), vec![hooked]);
    }

    #[tokio::test]
    async fn hook_failure_ends_in_webhook_fail_after_publishing() {
        let mut scanner = MockScannerAdapter::new();
        scanner.expect_scan().returning(|_| Ok(alpine_report()));
        let (controller, _) = controller(scanner);
        let controller = controller.with_completion_hook(Arc::new(RecordingHook {
            fail: true,
            ..Default::default()
        }));
        let id = queued(&controller, "alpine:3.18", Some("http://ci/hook")).await;

        let outcome = controller.run(id, "alpine:3.18").await.expect("run");
        assert!(matches!(outcome, ScanOutcome::WebhookFailed { .. }));

        let job = controller.ledger().get(id).await.expect("job");
        assert_eq!(job.status, ScanJobStatus::WebhookFail);
        assert!(job.error.as_deref().unwrap_or_default().contains("503"));

        let repo = RepositoryKey::parse("alpine:3.18").expect("key");
        assert!(controller.cache().get_report(&repo).await.is_ok());
    }

    #[tokio::test]
    async fn terminal_jobs_are_skipped() {
        let mut scanner = MockScannerAdapter::new();
        scanner.expect_scan().times(1).returning(|_| Ok(alpine_report()));
        let (controller, _) = controller(scanner);
        let id = queued(&controller, "alpine:3.18", None).await;

        controller.run(id, "alpine:3.18").await.expect("first run");
        let again = controller.run(id, "alpine:3.18").await.expect("redelivery");
        assert_eq!(
            again,
            ScanOutcome::Skipped {
                status: ScanJobStatus::Done
            }
        );
    }

    #[tokio::test]
    async fn missing_job_is_not_found() {
        let (controller, _) = controller(MockScannerAdapter::new());
        let err = controller
            .run(JobId::new(), "alpine:3.18")
            .await
            .expect_err("no ledger entry");
        assert!(err.is_not_found());
    }
}
