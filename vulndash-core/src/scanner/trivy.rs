//! Trivy CLI adapter.
//!
//! Runs `trivy image` as a subprocess, writing JSON to a temporary file that
//! is removed once the report has been decoded.

use std::{path::Path, process::Output, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, error, instrument};

use super::{ScanFailure, ScannerAdapter};
use crate::report::Report;

const DEFAULT_TIMEOUT_SECS: u64 = 600;
const SEVERITIES: &str = "CRITICAL,HIGH,MEDIUM,LOW";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrivyConfig {
    /// Path to the trivy executable (or "trivy" if in PATH)
    pub executable: String,
    /// Remote trivy server; scans run in client mode when set
    pub server: Option<String>,
    pub timeout_secs: u64,
}

impl Default for TrivyConfig {
    fn default() -> Self {
        Self {
            executable: "trivy".to_string(),
            server: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl TrivyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Output of `trivy --version --format json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(rename = "Version", default)]
    pub version: String,
    #[serde(
        rename = "VulnerabilityDB",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub vulnerability_db: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct TrivyScanner {
    config: TrivyConfig,
}

impl TrivyScanner {
    pub fn new(config: TrivyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrivyConfig {
        &self.config
    }

    fn scan_command(&self, image: &str, output: &Path) -> Command {
        let mut cmd = Command::new(&self.config.executable);
        cmd.arg("image");
        if let Some(server) = &self.config.server {
            cmd.arg("--server").arg(server);
        }
        cmd.arg("--severity")
            .arg(SEVERITIES)
            .arg("--ignore-unfixed")
            .arg("--format")
            .arg("json")
            .arg("--output")
            .arg(output)
            .arg(image)
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, mut cmd: Command) -> Result<Output, ScanFailure> {
        tokio::time::timeout(self.config.timeout(), cmd.output())
            .await
            .map_err(|_| {
                ScanFailure::new(format!(
                    "trivy timed out after {} seconds",
                    self.config.timeout_secs
                ))
            })?
            .map_err(|e| {
                ScanFailure::new(format!(
                    "failed to execute {}: {e}",
                    self.config.executable
                ))
            })
    }

    /// Scanner and vulnerability database version, checked once at boot.
    pub async fn version(&self) -> Result<VersionInfo, ScanFailure> {
        let mut cmd = Command::new(&self.config.executable);
        cmd.arg("--version")
            .arg("--format")
            .arg("json")
            .kill_on_drop(true);

        let output = self.run(cmd).await?;
        if !output.status.success() {
            return Err(ScanFailure::new(format!(
                "trivy --version failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))
            .with_exit_code(output.status.code()));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ScanFailure::new(format!("decoding trivy version: {e}")))
    }
}

#[async_trait]
impl ScannerAdapter for TrivyScanner {
    #[instrument(skip(self), fields(executable = %self.config.executable))]
    async fn scan(&self, image: &str) -> Result<Report, ScanFailure> {
        let report_file = tempfile::Builder::new()
            .prefix("scan_report_")
            .suffix(".json")
            .tempfile()
            .map_err(|e| ScanFailure::new(format!("creating report file: {e}")))?;

        let cmd = self.scan_command(image, report_file.path());
        debug!(command = ?cmd, "executing trivy");

        let output = self.run(cmd).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            error!(
                image,
                exit_code = output.status.code(),
                stderr = %stderr,
                "trivy run failed"
            );
            let detail = [stdout.trim(), stderr.trim()]
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            return Err(ScanFailure::new(format!("running trivy: {detail}"))
                .with_exit_code(output.status.code()));
        }

        debug!(image, exit_code = output.status.code(), "trivy run finished");

        let bytes = tokio::fs::read(report_file.path())
            .await
            .map_err(|e| ScanFailure::new(format!("reading scan report: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ScanFailure::new(format!("decoding scan report from file: {e}")))
    }
}
