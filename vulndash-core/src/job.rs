use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{Result, VulnError},
    report::Report,
};

/// Unique identifier for scan jobs, assigned at enqueue time.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = VulnError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(JobId)
            .map_err(|e| VulnError::InvalidInput(format!("invalid job id {s:?}: {e}")))
    }
}

/// Job lifecycle. Progress only moves forward:
///
/// ```text
/// Queued -> Pending -> Scanned -> Done
///    \________\__________\-----> ScanFail | WebhookFail
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ScanJobStatus {
    Queued,
    Pending,
    Scanned,
    ScanFail,
    WebhookFail,
    Done,
}

impl ScanJobStatus {
    pub const ALL: [ScanJobStatus; 6] = [
        ScanJobStatus::Queued,
        ScanJobStatus::Pending,
        ScanJobStatus::Scanned,
        ScanJobStatus::ScanFail,
        ScanJobStatus::WebhookFail,
        ScanJobStatus::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanJobStatus::Queued => "Queued",
            ScanJobStatus::Pending => "Pending",
            ScanJobStatus::Scanned => "Scanned",
            ScanJobStatus::ScanFail => "ScanFail",
            ScanJobStatus::WebhookFail => "WebhookFail",
            ScanJobStatus::Done => "Done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanJobStatus::Done | ScanJobStatus::ScanFail | ScanJobStatus::WebhookFail
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ScanJobStatus::ScanFail | ScanJobStatus::WebhookFail)
    }

    /// Whether `self -> next` is a legal move. A non-terminal state may be
    /// re-entered so a retried unit of work can replay its first step.
    pub fn can_transition_to(&self, next: ScanJobStatus) -> bool {
        use ScanJobStatus::*;

        if self.is_terminal() {
            return false;
        }
        if *self == next {
            return true;
        }
        match next {
            Queued => false,
            Pending => *self == Queued,
            Scanned => matches!(self, Queued | Pending),
            Done => *self == Scanned,
            ScanFail | WebhookFail => true,
        }
    }
}

impl fmt::Display for ScanJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanJobStatus {
    type Err = VulnError;

    fn from_str(s: &str) -> Result<Self> {
        ScanJobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| VulnError::InvalidInput(format!("unknown job status {s}")))
    }
}

/// One request to scan a single image reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: JobId,
    pub image: String,
    pub status: ScanJobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<Report>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScanJob {
    pub fn queued(id: JobId, image: impl Into<String>, webhook: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            image: image.into(),
            status: ScanJobStatus::Queued,
            error: None,
            report: None,
            webhook,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sum of all severities in the embedded report, zero before a scan lands.
    pub fn vulnerabilities_found(&self) -> u64 {
        self.report
            .as_ref()
            .map(|r| r.severity_counts().total())
            .unwrap_or(0)
    }

    /// Apply a status change in place, rejecting regressions.
    pub fn transition(&mut self, next: ScanJobStatus, error: Option<String>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(VulnError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_failure() {
            self.error = error.or_else(|| self.error.take());
        } else if error.is_some() {
            self.error = error;
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}
