//! Report cache and summary index.
//!
//! Both record classes are keyed by the report's repository token and share
//! the long report TTL. The remaining TTL doubles as a freshness clock:
//! `age = window - remaining`. The report is always written before its
//! summary, so readers may briefly see a report with no summary.

use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    config::RetentionConfig,
    error::{Result, VulnError},
    report::{Report, RepositoryKey, Severity, SeverityCounts},
    store::KeyValueStore,
};

pub const REPORT_KEY_PREFIX: &str = "vulndash:report:";
pub const SUMMARY_KEY_PREFIX: &str = "vulndash:summary:";

pub fn report_key(repo: &RepositoryKey) -> String {
    format!("{REPORT_KEY_PREFIX}{repo}")
}

pub fn summary_key(repo: &RepositoryKey) -> String {
    format!("{SUMMARY_KEY_PREFIX}{repo}")
}

/// Per-repository severity counts from the most recent scan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub repository: RepositoryKey,
    pub counts: SeverityCounts,
    /// Time since the summary was last written.
    #[serde(with = "duration_secs")]
    pub age: Duration,
    pub last_scan: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CachedReport {
    pub report: Report,
    pub counts: SeverityCounts,
    pub age: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryFailure {
    pub repository: String,
    pub reason: String,
}

/// Result of enumerating the summary index. Individual failures are reported
/// alongside the entries that did decode.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryListing {
    pub summaries: Vec<Summary>,
    pub failures: Vec<SummaryFailure>,
}

impl SummaryListing {
    pub fn totals(&self) -> DashboardTotals {
        let mut counts = SeverityCounts::default();
        for summary in &self.summaries {
            counts.merge(&summary.counts);
        }
        DashboardTotals {
            images: self.summaries.len(),
            critical: counts.get(Severity::Critical),
            high: counts.get(Severity::High),
            medium: counts.get(Severity::Medium),
            low: counts.get(Severity::Low),
            vulnerabilities: counts.total(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardTotals {
    pub images: usize,
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub vulnerabilities: u64,
}

#[derive(Clone)]
pub struct ReportCache {
    store: Arc<dyn KeyValueStore>,
    window: Duration,
}

impl fmt::Debug for ReportCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportCache")
            .field("store", &self.store)
            .field("window", &self.window)
            .finish()
    }
}

impl ReportCache {
    pub fn new(store: Arc<dyn KeyValueStore>, retention: RetentionConfig) -> Self {
        Self {
            store,
            window: retention.report_ttl(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn age_from(&self, remaining: Option<Duration>) -> Duration {
        remaining
            .map(|ttl| self.window.saturating_sub(ttl))
            .unwrap_or_default()
    }

    /// Upsert the full report; the freshness clock restarts.
    pub async fn set_report(&self, repo: &RepositoryKey, report: &Report) -> Result<()> {
        let bytes = serde_json::to_vec(report)?;
        self.store.set(&report_key(repo), bytes, self.window).await
    }

    pub async fn get_report(&self, repo: &RepositoryKey) -> Result<CachedReport> {
        let key = report_key(repo);
        let stored = self.store.get(&key).await?;
        let report: Report =
            serde_json::from_slice(&stored.value).map_err(|e| VulnError::corrupt(key, e))?;

        Ok(CachedReport {
            counts: report.severity_counts(),
            age: self.age_from(stored.ttl),
            report,
        })
    }

    /// Rebuild the summary wholesale from `report`.
    pub async fn set_summary(&self, repo: &RepositoryKey, report: &Report) -> Result<Summary> {
        let counts = report.severity_counts();
        let bytes = serde_json::to_vec(&counts)?;
        self.store.set(&summary_key(repo), bytes, self.window).await?;

        Ok(Summary {
            repository: repo.clone(),
            counts,
            age: Duration::ZERO,
            last_scan: format_age(Duration::ZERO),
        })
    }

    pub async fn get_summary(&self, repo: &RepositoryKey) -> Result<Summary> {
        let key = summary_key(repo);
        let stored = self.store.get(&key).await?;
        let counts: SeverityCounts =
            serde_json::from_slice(&stored.value).map_err(|e| VulnError::corrupt(key, e))?;
        let age = self.age_from(stored.ttl);

        Ok(Summary {
            repository: repo.clone(),
            counts,
            age,
            last_scan: format_age(age),
        })
    }

    /// Write report then summary for the report's repository key.
    pub async fn publish(&self, report: &Report) -> Result<RepositoryKey> {
        let repo = report.repository_key()?;
        self.set_report(&repo, report).await?;
        let summary = self.set_summary(&repo, report).await?;
        info!(
            repository = %repo,
            vulnerabilities = summary.counts.total(),
            "report published"
        );
        Ok(repo)
    }

    /// Enumerate every live summary. Only a failure to list the index itself
    /// is an error; per-repository problems land in `failures`.
    pub async fn list_summaries(&self) -> Result<SummaryListing> {
        let keys = self.store.list_keys(SUMMARY_KEY_PREFIX).await?;
        let mut listing = SummaryListing::default();

        for key in keys {
            let raw = key.trim_start_matches(SUMMARY_KEY_PREFIX);
            let outcome = match RepositoryKey::parse(raw) {
                Ok(repo) => self.get_summary(&repo).await,
                Err(err) => Err(err),
            };

            match outcome {
                Ok(summary) => listing.summaries.push(summary),
                Err(err) if err.is_retryable() => return Err(err),
                Err(err) => {
                    warn!(repository = %raw, error = %err, "skipping summary entry");
                    listing.failures.push(SummaryFailure {
                        repository: raw.to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        debug!(
            summaries = listing.summaries.len(),
            failures = listing.failures.len(),
            "summary index listed"
        );
        Ok(listing)
    }
}

/// Human-readable scan age: whole days past 24 hours, otherwise a compact
/// `1h 2m 3s` style string.
pub fn format_age(age: Duration) -> String {
    const DAY: u64 = 24 * 60 * 60;
    let secs = age.as_secs();
    if secs > DAY {
        return format!("{} day(s)", secs / DAY);
    }
    humantime::format_duration(Duration::from_secs(secs)).to_string()
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        report::{ScanTarget, Vulnerability},
        store::MemoryStore,
    };

    fn cache() -> (ReportCache, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (
            ReportCache::new(store.clone(), RetentionConfig::default()),
            store,
        )
    }

    fn report(target: &str, severities: &[Severity]) -> Report {
        Report::new(vec![ScanTarget::new(
            target,
            severities
                .iter()
                .enumerate()
                .map(|(i, s)| Vulnerability::new(format!("CVE-{i}"), *s))
                .collect(),
        )])
    }

    #[tokio::test]
    async fn publish_writes_report_and_summary_under_repository_key() {
        let (cache, _) = cache();
        let report = report(
            "alpine:3.18 (alpine 3.18.0)",
            &[Severity::Critical, Severity::High, Severity::High, Severity::Low],
        );

        let repo = cache.publish(&report).await.expect("publish");
        assert_eq!(repo.as_str(), "alpine:3.18");

        let cached = cache.get_report(&repo).await.expect("report");
        assert_eq!(cached.report, report);

        let summary = cache.get_summary(&repo).await.expect("summary");
        assert_eq!(
            serde_json::to_value(&summary.counts).expect("json"),
            serde_json::json!({"CRITICAL": 1, "HIGH": 2, "LOW": 1})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn republishing_is_content_idempotent_and_resets_age() {
        let (cache, _) = cache();
        let report = report("nginx:1.25 (debian 12.2)", &[Severity::Medium]);
        let repo = cache.publish(&report).await.expect("publish");

        tokio::time::advance(Duration::from_secs(7200)).await;
        let before = cache.get_report(&repo).await.expect("report");
        assert_eq!(before.age, Duration::from_secs(7200));

        cache.publish(&report).await.expect("publish again");
        let after = cache.get_report(&repo).await.expect("report");
        assert_eq!(after.report, before.report);
        assert_eq!(after.counts, before.counts);
        assert_eq!(after.age, Duration::ZERO);
    }

    #[tokio::test]
    async fn missing_report_is_not_found() {
        let (cache, _) = cache();
        let repo = RepositoryKey::parse("bad/image").expect("key");
        assert!(cache.get_report(&repo).await.expect_err("missing").is_not_found());
    }

    #[tokio::test]
    async fn publish_rejects_report_without_targets() {
        let (cache, store) = cache();
        assert!(matches!(
            cache.publish(&Report::default()).await,
            Err(VulnError::InvalidReport(_))
        ));
        assert!(
            store
                .list_keys(REPORT_KEY_PREFIX)
                .await
                .expect("list")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn listing_reports_corrupt_entries_per_item() {
        let (cache, store) = cache();
        cache
            .publish(&report("alpine:3.18 (alpine 3.18.0)", &[Severity::High]))
            .await
            .expect("publish alpine");
        cache
            .publish(&report("redis:7 (debian 12.2)", &[Severity::Low, Severity::Low]))
            .await
            .expect("publish redis");
        store
            .set(
                &format!("{SUMMARY_KEY_PREFIX}broken:1"),
                b"\x00\x01gob".to_vec(),
                Duration::from_secs(60),
            )
            .await
            .expect("seed corrupt");

        let listing = cache.list_summaries().await.expect("list");
        assert_eq!(listing.summaries.len(), 2);
        assert_eq!(listing.failures.len(), 1);
        assert_eq!(listing.failures[0].repository, "broken:1");

        let totals = listing.totals();
        assert_eq!(totals.images, 2);
        assert_eq!(totals.high, 1);
        assert_eq!(totals.low, 2);
        assert_eq!(totals.vulnerabilities, 3);
    }

    #[tokio::test]
    async fn report_without_summary_is_tolerated() {
        let (cache, _) = cache();
        let report = report("busybox:1.36 (busybox)", &[Severity::Low]);
        let repo = report.repository_key().expect("key");
        cache.set_report(&repo, &report).await.expect("report only");

        assert!(cache.get_report(&repo).await.is_ok());
        assert!(cache.get_summary(&repo).await.expect_err("lagging").is_not_found());
        assert!(cache.list_summaries().await.expect("list").summaries.is_empty());
    }

    #[test]
    fn age_formatting_switches_to_days_after_a_day() {
        assert_eq!(format_age(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_age(Duration::from_secs(3 * 24 * 3600 + 5)), "3 day(s)");
        assert_eq!(format_age(Duration::ZERO), "0s");
    }
}
