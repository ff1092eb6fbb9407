use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default lifetime of a job ledger entry (one hour).
pub const DEFAULT_JOB_TTL_SECS: u64 = 60 * 60;

/// Default lifetime of a cached report and its summary (2000 hours).
pub const DEFAULT_REPORT_TTL_SECS: u64 = 2_000 * 60 * 60;

/// Worker pool tuning.
///
/// All fields carry defaults so a partial config file only needs to name the
/// knobs it changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent executors. Each one drives a single job end to end.
    pub workers: usize,
    /// Total attempts per unit of work when the failure is infrastructural.
    /// Scan failures are terminal and never count against this.
    pub max_attempts: u16,
    /// Sleep between polls of an empty queue (ms).
    pub poll_interval_ms: u64,
    /// How long `stop` waits for each in-flight executor before giving up (s).
    pub shutdown_grace_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            max_attempts: 2,
            poll_interval_ms: 250,
            shutdown_grace_secs: 30,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// TTL windows for each record class. The windows are independent: a job
/// entry expiring never touches the report cache.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetentionConfig {
    pub job_ttl_secs: u64,
    pub report_ttl_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            job_ttl_secs: DEFAULT_JOB_TTL_SECS,
            report_ttl_secs: DEFAULT_REPORT_TTL_SECS,
        }
    }
}

impl RetentionConfig {
    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }

    pub fn report_ttl(&self) -> Duration {
        Duration::from_secs(self.report_ttl_secs)
    }
}
