//! Layered configuration for truthcast.
//!
//! Settings are read from `.truthcast/truthcast.toml`, then overridden by
//! environment variables, then by CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [api]
//! base_url = "http://127.0.0.1:8000"
//! timeout_secs = 30
//! retry_times = 3
//!
//! [storage]
//! db_path = "data/history/history.db"
//! snapshot_backend = "sqlite"
//!
//! [pipeline]
//! detect_failure_policy = "degrade"
//! content_enabled = true
//! placeholder_text = ""
//!
//! [simulation]
//! time_window_hours = 24
//! platform = "general"
//!
//! [content]
//! style = "neutral"
//! platforms = ["weibo", "wechat", "short_video"]
//! include_faq = true
//! faq_count = 5
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestrator::PipelineConfig;

/// What the chain does when `detect` fails.
///
/// | Policy    | Chain after a failed `detect`                  |
/// |-----------|------------------------------------------------|
/// | `Degrade` | runs on with no strategy (default)             |
/// | `Halt`    | stops; downstream phases stay `idle`           |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectFailurePolicy {
    #[default]
    Degrade,
    Halt,
}

impl std::fmt::Display for DetectFailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectFailurePolicy::Degrade => write!(f, "degrade"),
            DetectFailurePolicy::Halt => write!(f, "halt"),
        }
    }
}

impl std::str::FromStr for DetectFailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "degrade" => Ok(DetectFailurePolicy::Degrade),
            "halt" => Ok(DetectFailurePolicy::Halt),
            _ => anyhow::bail!(
                "Invalid detect failure policy '{}'. Valid values: degrade, halt",
                s
            ),
        }
    }
}

/// Where phase snapshots are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotBackend {
    /// Local SQLite file shared with the history store
    #[default]
    Sqlite,
    /// The analysis service's `/pipeline` routes
    Http,
}

impl std::fmt::Display for SnapshotBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotBackend::Sqlite => write!(f, "sqlite"),
            SnapshotBackend::Http => write!(f, "http"),
        }
    }
}

impl std::str::FromStr for SnapshotBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(SnapshotBackend::Sqlite),
            "http" => Ok(SnapshotBackend::Http),
            _ => anyhow::bail!("Invalid snapshot backend '{}'. Valid values: sqlite, http", s),
        }
    }
}

/// Analysis service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout for unary stage calls
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Total attempts per unary call on connect/timeout errors
    #[serde(default = "default_retry_times")]
    pub retry_times: u32,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_retry_times() -> u32 {
    3
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            retry_times: default_retry_times(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// SQLite file for history and (by default) snapshots
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default)]
    pub snapshot_backend: SnapshotBackend,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/history/history.db")
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            snapshot_backend: SnapshotBackend::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(default)]
    pub detect_failure_policy: DetectFailurePolicy,
    /// Run the response-content phase after simulation
    #[serde(default = "default_true")]
    pub content_enabled: bool,
    /// Input text that does not count as user-entered work
    #[serde(default)]
    pub placeholder_text: String,
}

fn default_true() -> bool {
    true
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            detect_failure_policy: DetectFailurePolicy::default(),
            content_enabled: true,
            placeholder_text: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSection {
    #[serde(default = "default_time_window_hours")]
    pub time_window_hours: u32,
    #[serde(default = "default_platform")]
    pub platform: String,
}

fn default_time_window_hours() -> u32 {
    24
}

fn default_platform() -> String {
    "general".to_string()
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            time_window_hours: default_time_window_hours(),
            platform: default_platform(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSection {
    /// formal / friendly / neutral
    #[serde(default = "default_style")]
    pub style: String,
    #[serde(default = "default_platforms")]
    pub platforms: Vec<String>,
    #[serde(default = "default_true")]
    pub include_faq: bool,
    #[serde(default = "default_faq_count")]
    pub faq_count: u32,
}

fn default_style() -> String {
    "neutral".to_string()
}

fn default_platforms() -> Vec<String> {
    vec![
        "weibo".to_string(),
        "wechat".to_string(),
        "short_video".to_string(),
    ]
}

fn default_faq_count() -> u32 {
    5
}

impl Default for ContentSection {
    fn default() -> Self {
        Self {
            style: default_style(),
            platforms: default_platforms(),
            include_faq: true,
            faq_count: default_faq_count(),
        }
    }
}

/// The complete truthcast.toml configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TruthcastToml {
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub simulation: SimulationSection,
    #[serde(default)]
    pub content: ContentSection,
}

impl TruthcastToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse truthcast.toml")
    }

    /// Load `truthcast.toml` from the config directory, or defaults if absent.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join("truthcast.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize truthcast.toml")
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(base) = get("TRUTHCAST_API_BASE").or_else(|| get("NEXT_PUBLIC_API_BASE")) {
            self.api.base_url = base.trim().to_string();
        }
        if let Some(raw) = get("TRUTHCAST_CLI_TIMEOUT") {
            self.api.timeout_secs = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid TRUTHCAST_CLI_TIMEOUT '{}'", raw))?;
        }
        if let Some(raw) = get("TRUTHCAST_CLI_RETRY_TIMES") {
            self.api.retry_times = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid TRUTHCAST_CLI_RETRY_TIMES '{}'", raw))?;
        }
        if let Some(path) = get("TRUTHCAST_HISTORY_DB_PATH") {
            self.storage.db_path = PathBuf::from(path.trim());
        }
        if let Some(raw) = get("TRUTHCAST_DETECT_FAILURE_POLICY") {
            self.pipeline.detect_failure_policy = raw.trim().parse()?;
        }
        if let Some(raw) = get("TRUTHCAST_SNAPSHOT_BACKEND") {
            self.storage.snapshot_backend = raw.trim().parse()?;
        }
        Ok(())
    }

    /// Return a list of validation warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            warnings.push(format!(
                "api.base_url '{}' is not an http(s) URL",
                self.api.base_url
            ));
        }
        if self.api.timeout_secs == 0 {
            warnings.push("api.timeout_secs is 0; every stage call will time out".to_string());
        }
        if !(1..=168).contains(&self.simulation.time_window_hours) {
            warnings.push(format!(
                "simulation.time_window_hours {} is outside 1..=168",
                self.simulation.time_window_hours
            ));
        }
        if !(3..=10).contains(&self.content.faq_count) {
            warnings.push(format!(
                "content.faq_count {} is outside 3..=10",
                self.content.faq_count
            ));
        }
        warnings
    }
}

/// CLI flags that override file and environment settings.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub api_base: Option<String>,
    pub db_path: Option<PathBuf>,
}

/// Effective configuration: file, then environment, then CLI.
#[derive(Debug, Clone)]
pub struct TruthcastConfig {
    pub project_dir: PathBuf,
    /// Path to the `.truthcast` directory
    pub config_dir: PathBuf,
    pub toml: TruthcastToml,
}

impl TruthcastConfig {
    /// Load from `project_dir`, reading the process environment (and `.env`).
    pub fn load(project_dir: &Path, overrides: &CliOverrides) -> Result<Self> {
        let _ = dotenvy::from_path(project_dir.join(".env"));
        Self::load_with_env(project_dir, overrides, |key| std::env::var(key).ok())
    }

    /// Load with an explicit environment lookup.
    pub fn load_with_env<F>(project_dir: &Path, overrides: &CliOverrides, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_dir = project_dir.join(".truthcast");
        let mut toml = TruthcastToml::load_or_default(&config_dir)?;
        toml.apply_env(lookup)?;

        if let Some(base) = &overrides.api_base {
            toml.api.base_url = base.clone();
        }
        if let Some(path) = &overrides.db_path {
            toml.storage.db_path = path.clone();
        }

        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            config_dir,
            toml,
        })
    }

    /// Database path, resolved against the project directory.
    pub fn db_path(&self) -> PathBuf {
        if self.toml.storage.db_path.is_absolute() {
            self.toml.storage.db_path.clone()
        } else {
            self.project_dir.join(&self.toml.storage.db_path)
        }
    }

    pub fn api_base(&self) -> &str {
        &self.toml.api.base_url
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.toml.api.timeout_secs)
    }

    pub fn retry_times(&self) -> u32 {
        self.toml.api.retry_times
    }

    pub fn snapshot_backend(&self) -> SnapshotBackend {
        self.toml.storage.snapshot_backend
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            detect_failure_policy: self.toml.pipeline.detect_failure_policy,
            content_enabled: self.toml.pipeline.content_enabled,
            placeholder_text: self.toml.pipeline.placeholder_text.clone(),
            simulation: self.toml.simulation.clone(),
            content: self.toml.content.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_service_cli() {
        let toml = TruthcastToml::default();
        assert_eq!(toml.api.base_url, "http://127.0.0.1:8000");
        assert_eq!(toml.api.timeout_secs, 30);
        assert_eq!(toml.api.retry_times, 3);
        assert_eq!(toml.storage.db_path, PathBuf::from("data/history/history.db"));
        assert_eq!(toml.pipeline.detect_failure_policy, DetectFailurePolicy::Degrade);
        assert!(toml.pipeline.content_enabled);
        assert_eq!(toml.content.faq_count, 5);
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_file() {
        let toml = TruthcastToml::parse(
            r#"
            [api]
            base_url = "http://analysis:9000"

            [pipeline]
            detect_failure_policy = "halt"
            content_enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(toml.api.base_url, "http://analysis:9000");
        assert_eq!(toml.api.timeout_secs, 30);
        assert_eq!(toml.pipeline.detect_failure_policy, DetectFailurePolicy::Halt);
        assert!(!toml.pipeline.content_enabled);
        assert_eq!(toml.simulation.platform, "general");
    }

    #[test]
    fn test_env_overrides_file() {
        let mut toml = TruthcastToml::default();
        toml.apply_env(env(&[
            ("NEXT_PUBLIC_API_BASE", "http://fallback:8000"),
            ("TRUTHCAST_CLI_TIMEOUT", "5"),
            ("TRUTHCAST_SNAPSHOT_BACKEND", "HTTP"),
        ]))
        .unwrap();
        assert_eq!(toml.api.base_url, "http://fallback:8000");
        assert_eq!(toml.api.timeout_secs, 5);
        assert_eq!(toml.storage.snapshot_backend, SnapshotBackend::Http);

        toml.apply_env(env(&[
            ("TRUTHCAST_API_BASE", "http://primary:8000"),
            ("NEXT_PUBLIC_API_BASE", "http://fallback:8000"),
        ]))
        .unwrap();
        assert_eq!(toml.api.base_url, "http://primary:8000");
    }

    #[test]
    fn test_invalid_env_value_is_an_error() {
        let mut toml = TruthcastToml::default();
        let err = toml
            .apply_env(env(&[("TRUTHCAST_CLI_RETRY_TIMES", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("TRUTHCAST_CLI_RETRY_TIMES"));
        assert!(
            toml.apply_env(env(&[("TRUTHCAST_DETECT_FAILURE_POLICY", "ignore")]))
                .is_err()
        );
    }

    #[test]
    fn test_layering_file_env_cli() {
        let dir = tempdir().unwrap();
        let config_dir = dir.path().join(".truthcast");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("truthcast.toml"),
            "[api]\nbase_url = \"http://file:1\"\nretry_times = 1\n",
        )
        .unwrap();

        let overrides = CliOverrides {
            api_base: Some("http://cli:3".into()),
            db_path: None,
        };
        let config = TruthcastConfig::load_with_env(
            dir.path(),
            &overrides,
            env(&[
                ("TRUTHCAST_API_BASE", "http://env:2"),
                ("TRUTHCAST_HISTORY_DB_PATH", "state/h.db"),
            ]),
        )
        .unwrap();
        assert_eq!(config.api_base(), "http://cli:3");
        assert_eq!(config.retry_times(), 1);
        assert_eq!(config.db_path(), dir.path().join("state/h.db"));
    }

    #[test]
    fn test_toml_roundtrip_for_config_command() {
        let toml = TruthcastToml::default();
        let rendered = toml.to_toml_string().unwrap();
        assert!(rendered.contains("[pipeline]"));
        let back = TruthcastToml::parse(&rendered).unwrap();
        assert_eq!(back.content, toml.content);
    }
}
