use thiserror::Error;

use crate::job::ScanJobStatus;

#[derive(Error, Debug)]
pub enum VulnError {
    /// Store or queue infrastructure failure (unreachable, protocol error).
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A stored record exists but cannot be decoded.
    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid report: {0}")]
    InvalidReport(String),

    #[error("Invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: ScanJobStatus,
        to: ScanJobStatus,
    },

    #[error("Scan failed: {0}")]
    Scan(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VulnError {
    pub fn corrupt(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::Corrupt {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Only infrastructure failures are worth handing back to the queue.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VulnError::Backend(_) | VulnError::Io(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VulnError::NotFound(_))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for VulnError {
    fn from(err: redis::RedisError) -> Self {
        VulnError::Backend(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VulnError>;
