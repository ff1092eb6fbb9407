use anyhow::{Context, anyhow};
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use vulndash_core::{RetentionConfig, TrivyConfig, WorkerConfig};

const DEFAULT_PORT: u16 = 8001;
const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 30;

/// Server configuration loaded via environment variables (and optionally an
/// engine config file).
#[derive(Debug, Clone)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    /// Absent means a process-local store; nothing survives a restart.
    pub redis_url: Option<String>,

    pub trivy: TrivyConfig,

    // CORS settings
    pub cors_allowed_origins: Vec<String>,

    pub webhook_timeout_secs: u64,

    /// Worker pool and retention tuning.
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: DEFAULT_PORT,
            redis_url: None,
            trivy: TrivyConfig::default(),
            cors_allowed_origins: vec!["*".to_string()],
            webhook_timeout_secs: DEFAULT_WEBHOOK_TIMEOUT_SECS,
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let engine = EngineConfig::load_from_env()?;

        Ok(Self {
            server_host: env::var("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: parse_env("SERVER_PORT")?.unwrap_or(defaults.server_port),

            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty()),

            trivy: TrivyConfig {
                executable: env::var("TRIVY_PATH").unwrap_or(defaults.trivy.executable),
                server: env::var("TRIVY_SERVER")
                    .ok()
                    .filter(|server| !server.trim().is_empty()),
                timeout_secs: parse_env("TRIVY_TIMEOUT_SECS")?
                    .unwrap_or(defaults.trivy.timeout_secs),
            },

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .map(|raw| split_origins(&raw))
                .unwrap_or(defaults.cors_allowed_origins),

            webhook_timeout_secs: parse_env("WEBHOOK_TIMEOUT_SECS")?
                .unwrap_or(defaults.webhook_timeout_secs),

            engine,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }
}

fn parse_env<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        _ => Ok(None),
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Engine tuning. Use `workers` to trade scan throughput against load on the
/// scanner host, and the retention windows to decide how long job records and
/// cached reports live.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub workers: WorkerConfig,
    pub retention: RetentionConfig,
}

impl EngineConfig {
    /// Load engine configuration overrides. Evaluation order:
    /// 1) `$VULNDASH_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$VULNDASH_CONFIG_JSON` (inline JSON),
    /// 3) `vulndash.toml` / `config/vulndash.toml` in the working directory,
    /// 4) defaults.
    fn load_from_env() -> anyhow::Result<Self> {
        if let Ok(path) = env::var("VULNDASH_CONFIG_PATH") {
            return Self::load_from_file(Path::new(&path));
        }

        if let Ok(raw) = env::var("VULNDASH_CONFIG_JSON") {
            return Self::parse_json(&raw).context("failed to parse VULNDASH_CONFIG_JSON");
        }

        if let Some(path) = Self::find_default_file() {
            return Self::load_from_file(&path);
        }

        Ok(Self::default())
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents)
                .with_context(|| format!("invalid engine config {}", path.display())),
            Some("toml") | Some("tml") => toml::from_str(&contents)
                .map_err(|err| anyhow!("invalid engine config {}: {}", path.display(), err)),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        // Try TOML first, then JSON for convenience.
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse engine config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow!("invalid engine config json: {err}"))
    }

    fn find_default_file() -> Option<PathBuf> {
        const CANDIDATES: &[&str] = &[
            "vulndash.toml",
            "vulndash.json",
            "config/vulndash.toml",
            "config/vulndash.json",
        ];

        CANDIDATES
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(|path| path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vulndash.toml");
        fs::write(
            &path,
            "[workers]\nworkers = 8\n\n[retention]\njob_ttl_secs = 120\n",
        )
        .expect("write");

        let config = EngineConfig::load_from_file(&path).expect("load");
        assert_eq!(config.workers.workers, 8);
        assert_eq!(config.workers.max_attempts, WorkerConfig::default().max_attempts);
        assert_eq!(config.retention.job_ttl_secs, 120);
        assert_eq!(
            config.retention.report_ttl_secs,
            RetentionConfig::default().report_ttl_secs
        );
    }

    #[test]
    fn json_file_is_accepted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("engine.json");
        fs::write(&path, r#"{"workers": {"poll_interval_ms": 50}}"#).expect("write");

        let config = EngineConfig::load_from_file(&path).expect("load");
        assert_eq!(config.workers.poll_interval_ms, 50);
    }

    #[test]
    fn extensionless_file_falls_back_to_json() {
        let config = EngineConfig::parse_from_str(r#"{"workers": {"workers": 2}}"#, "inline")
            .expect("parse");
        assert_eq!(config.workers.workers, 2);
        assert!(EngineConfig::parse_from_str("workers = [", "inline").is_err());
    }

    #[test]
    fn origins_are_trimmed_and_blank_entries_dropped() {
        assert_eq!(
            split_origins(" http://a.test , ,http://b.test"),
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
    }
}
