//! Scan report model.
//!
//! Field names follow the scanner's JSON output (`Results[].Target`,
//! `Results[].Vulnerabilities[].Severity`, ...). Anything the engine does not
//! interpret is kept in `extra` so a cached report round-trips without loss.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, VulnError};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = VulnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CRITICAL" => Ok(Severity::Critical),
            "HIGH" => Ok(Severity::High),
            "MEDIUM" => Ok(Severity::Medium),
            "LOW" => Ok(Severity::Low),
            other => Err(VulnError::InvalidInput(format!("unknown severity {other}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    #[serde(rename = "VulnerabilityID", default)]
    pub vulnerability_id: String,
    #[serde(rename = "PkgName", default)]
    pub pkg_name: String,
    #[serde(rename = "InstalledVersion", default)]
    pub installed_version: String,
    #[serde(rename = "FixedVersion", default, skip_serializing_if = "Option::is_none")]
    pub fixed_version: Option<String>,
    #[serde(rename = "Title", default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "Severity")]
    pub severity: Severity,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Vulnerability {
    pub fn new(id: impl Into<String>, severity: Severity) -> Self {
        Self {
            vulnerability_id: id.into(),
            pkg_name: String::new(),
            installed_version: String::new(),
            fixed_version: None,
            title: None,
            severity,
            extra: serde_json::Map::new(),
        }
    }
}

/// Results for one scan target (an OS layer, a language lockfile, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanTarget {
    #[serde(rename = "Target")]
    pub target: String,
    #[serde(
        rename = "Vulnerabilities",
        default,
        deserialize_with = "null_as_empty"
    )]
    pub vulnerabilities: Vec<Vulnerability>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ScanTarget {
    pub fn new(target: impl Into<String>, vulnerabilities: Vec<Vulnerability>) -> Self {
        Self {
            target: target.into(),
            vulnerabilities,
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(rename = "Results", default, deserialize_with = "null_as_empty")]
    pub results: Vec<ScanTarget>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Report {
    pub fn new(results: Vec<ScanTarget>) -> Self {
        Self {
            results,
            extra: serde_json::Map::new(),
        }
    }

    pub fn vulnerabilities(&self) -> impl Iterator<Item = &Vulnerability> {
        self.results.iter().flat_map(|t| t.vulnerabilities.iter())
    }

    pub fn severity_counts(&self) -> SeverityCounts {
        let mut counts = SeverityCounts::default();
        for vuln in self.vulnerabilities() {
            counts.increment(vuln.severity);
        }
        counts
    }

    pub fn total_vulnerabilities(&self) -> u64 {
        self.vulnerabilities().count() as u64
    }

    /// Canonical cache key: the first whitespace-delimited token of the first
    /// target, e.g. `"alpine:3.18 (alpine 3.18.0)"` -> `alpine:3.18`.
    pub fn repository_key(&self) -> Result<RepositoryKey> {
        let first = self
            .results
            .first()
            .ok_or_else(|| VulnError::InvalidReport("report contains no scan targets".into()))?;

        let token = first.target.split_whitespace().next().ok_or_else(|| {
            VulnError::InvalidReport("first scan target has an empty identifier".into())
        })?;

        RepositoryKey::parse(token)
    }
}

/// Severity -> count. Severities that never occurred are absent and read as 0.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeverityCounts(BTreeMap<Severity, u64>);

impl SeverityCounts {
    pub fn increment(&mut self, severity: Severity) {
        *self.0.entry(severity).or_insert(0) += 1;
    }

    pub fn get(&self, severity: Severity) -> u64 {
        self.0.get(&severity).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Severity, u64)> + '_ {
        self.0.iter().map(|(s, c)| (*s, *c))
    }

    /// Add another set of counts into this one.
    pub fn merge(&mut self, other: &SeverityCounts) {
        for (severity, count) in other.iter() {
            *self.0.entry(severity).or_insert(0) += count;
        }
    }

    pub fn has_blocking(&self) -> bool {
        self.get(Severity::Critical) > 0 || self.get(Severity::High) > 0
    }
}

impl FromIterator<(Severity, u64)> for SeverityCounts {
    fn from_iter<I: IntoIterator<Item = (Severity, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().filter(|(_, c)| *c > 0).collect())
    }
}

/// Identifier addressing a cached report and its summary.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryKey(String);

impl RepositoryKey {
    /// Accepts user-facing forms such as `/alpine:3.18` (route wildcards keep
    /// the leading slash). Blank or whitespace-bearing keys are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim().trim_start_matches('/');
        if trimmed.is_empty() {
            return Err(VulnError::InvalidReport("repository key is empty".into()));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(VulnError::InvalidReport(format!(
                "repository key {trimmed:?} contains whitespace"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepositoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
