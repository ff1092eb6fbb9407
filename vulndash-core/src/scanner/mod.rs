//! External scanner seam.
//!
//! The engine only needs "image reference in, report or failure out". How the
//! scan happens (subprocess, remote server, fixture) is the adapter's concern.

use async_trait::async_trait;
use thiserror::Error;

use crate::report::Report;

mod trivy;

pub use trivy::{TrivyConfig, TrivyScanner, VersionInfo};

/// Why a scan produced no report. The message ends up verbatim in the job's
/// `error` field.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ScanFailure {
    pub message: String,
    pub exit_code: Option<i32>,
}

impl ScanFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            exit_code: None,
        }
    }

    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScannerAdapter: Send + Sync {
    async fn scan(&self, image: &str) -> Result<Report, ScanFailure>;
}
