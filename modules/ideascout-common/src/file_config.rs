use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Default location of the pipeline tuning file, overridable with `IDEASCOUT_CONFIG`.
pub const DEFAULT_CONFIG_PATH: &str = "ideascout.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Claude,
    OpenAi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Claude => "claude",
            ProviderKind::OpenAi => "openai",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    pub model: String,
}

impl ProviderConfig {
    pub fn claude(model: impl Into<String>) -> Self {
        Self {
            provider: ProviderKind::Claude,
            model: model.into(),
        }
    }

    pub fn openai(model: impl Into<String>) -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: model.into(),
        }
    }
}

/// TOML-backed pipeline tuning. Every field has a default so an absent or
/// partial file still yields a working pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// One entry runs single-provider mode; two run dual consensus.
    pub classifiers: Vec<ProviderConfig>,
    pub extractor: ProviderConfig,
    pub retry: RetryConfig,
    pub chunks: ChunkConfig,
    pub workers: WorkerConfig,
    pub scan: ScanConfig,
    pub fetch: FetchConfig,
    pub queue: QueueConfig,
    pub reaper: ReaperConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            classifiers: vec![
                ProviderConfig::claude("claude-3-5-haiku-latest"),
                ProviderConfig::openai("gpt-4o-mini"),
            ],
            extractor: ProviderConfig::claude("claude-sonnet-4-5-20250929"),
            retry: RetryConfig::default(),
            chunks: ChunkConfig::default(),
            workers: WorkerConfig::default(),
            scan: ScanConfig::default(),
            fetch: FetchConfig::default(),
            queue: QueueConfig::default(),
            reaper: ReaperConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per model call, the first included.
    pub max_attempts: u32,
    /// Seconds per backoff unit; backoff is `min(2^attempt, max_backoff)` units.
    pub backoff_unit_secs: f64,
    pub max_backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit_secs: 1.0,
            max_backoff_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    pub classify: usize,
    pub extract: usize,
    pub replies: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            classify: 10,
            extract: 5,
            replies: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub fetch: usize,
    pub classify: usize,
    pub extract: usize,
    /// Idle poll interval when a queue is empty.
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            fetch: 2,
            classify: 4,
            extract: 2,
            poll_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub initial_window_days: i64,
    pub rescan_window_days: i64,
    pub max_ideas_per_item: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            initial_window_days: 30,
            rescan_window_days: 7,
            max_ideas_per_item: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub page_size: u32,
    /// Upper bound on posts one source run may return.
    pub max_items: u32,
    pub max_replies: u32,
    pub poll_delay_secs: u64,
    /// Polls before the completion check gives up waiting on reply jobs.
    pub poll_cap: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_items: 500,
            max_replies: 20,
            poll_delay_secs: 10,
            poll_cap: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// A reserved job becomes visible again after this long without completion.
    pub lease_secs: u64,
    pub max_attempts: i32,
    pub retry_delay_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_secs: 300,
            max_attempts: 5,
            retry_delay_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    pub max_age_minutes: i64,
    pub interval_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            max_age_minutes: 60,
            interval_secs: 300,
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: PipelineConfig =
            toml::from_str(content).context("Failed to parse pipeline config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "No pipeline config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Load from `IDEASCOUT_CONFIG` or `ideascout.toml`.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var("IDEASCOUT_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(Path::new(&path))
    }

    pub fn validate(&self) -> Result<()> {
        if self.classifiers.is_empty() || self.classifiers.len() > 2 {
            anyhow::bail!(
                "classifiers must list one or two providers, got {}",
                self.classifiers.len()
            );
        }
        if self.chunks.classify == 0 || self.chunks.extract == 0 || self.chunks.replies == 0 {
            anyhow::bail!("chunk sizes must be positive");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config.classifiers.len(), 2);
        assert_eq!(config.chunks.classify, 10);
        assert_eq!(config.scan.max_ideas_per_item, 3);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
            [[classifiers]]
            provider = "openai"
            model = "gpt-4o-mini"

            [chunks]
            classify = 25
            "#,
        )
        .unwrap();
        assert_eq!(config.classifiers, vec![ProviderConfig::openai("gpt-4o-mini")]);
        assert_eq!(config.chunks.classify, 25);
        assert_eq!(config.chunks.extract, 5);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn three_classifiers_are_rejected() {
        let err = PipelineConfig::from_toml(
            r#"
            classifiers = [
                { provider = "claude", model = "a" },
                { provider = "openai", model = "b" },
                { provider = "openai", model = "c" },
            ]
            "#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(PipelineConfig::from_toml("colour = \"blue\"").is_err());
    }
}
