//! Read-only views over the job ledger.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    error::Result,
    job::{JobId, ScanJobStatus},
    ledger::JobLedger,
};

/// Per-job status as exposed to pollers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: JobId,
    pub status: ScanJobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub vulnerabilities_found: u64,
}

#[derive(Clone, Debug)]
pub struct StatusQuery {
    ledger: JobLedger,
}

impl StatusQuery {
    pub fn new(ledger: JobLedger) -> Self {
        Self { ledger }
    }

    /// NotFound once the ledger entry has expired.
    pub async fn job_status(&self, id: JobId) -> Result<JobStatusView> {
        let job = self.ledger.get(id).await?;
        Ok(JobStatusView {
            id: job.id,
            status: job.status,
            vulnerabilities_found: job.vulnerabilities_found(),
            error: job.error,
        })
    }

    /// Live jobs tallied by status name. Statuses with no jobs are omitted.
    pub async fn aggregate_status(&self) -> Result<BTreeMap<String, u64>> {
        let listing = self.ledger.list_jobs().await?;
        if listing.skipped > 0 {
            warn!(skipped = listing.skipped, "status histogram skipped unreadable jobs");
        }

        let mut histogram = BTreeMap::new();
        for job in &listing.jobs {
            *histogram.entry(job.status.to_string()).or_insert(0) += 1;
        }
        Ok(histogram)
    }
}
