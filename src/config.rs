//! Analyzer configuration: token limits, scanner settings, model choice.
//!
//! Loaded from a TOML file (every key optional) and overridden from the
//! environment. Gateway credentials are not part of this file; the OpenRouter
//! adapter reads its own `OPENROUTER_*` variables.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "google/gemini-2.5-flash-lite";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// =============================================================================
// Token limits
// =============================================================================

/// Token budgets governing routing, chunking and reduction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Limits {
    /// Hard context window of the model (default: 131,072).
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,
    /// Room kept free for the system prompt, template text and output when
    /// deciding whether the whole codebase fits in one call (default: 8,000).
    #[serde(default = "default_overhead_reserve")]
    pub overhead_reserve: usize,
    /// Headroom subtracted from each chunk budget (default: 8,000).
    #[serde(default = "default_chunk_safety_margin")]
    pub chunk_safety_margin: usize,
    /// Floor for the computed chunk budget (default: 1,000).
    #[serde(default = "default_min_chunk_tokens")]
    pub min_chunk_tokens: usize,
    /// Ceiling for one reduce call, prompt included (default: 90,000).
    #[serde(default = "default_reduce_budget")]
    pub reduce_budget: usize,
    /// Most summaries consolidated in one reduce call (default: 20).
    #[serde(default = "default_reduce_batch_max")]
    pub reduce_batch_max: usize,
    /// Concurrent backend calls per stage (default: 8).
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Output cap sent with each request (default: provider default).
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

fn default_context_limit() -> usize {
    131_072
}
fn default_overhead_reserve() -> usize {
    8_000
}
fn default_chunk_safety_margin() -> usize {
    8_000
}
fn default_min_chunk_tokens() -> usize {
    1_000
}
fn default_reduce_budget() -> usize {
    90_000
}
fn default_reduce_batch_max() -> usize {
    20
}
fn default_max_concurrency() -> usize {
    8
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            context_limit: default_context_limit(),
            overhead_reserve: default_overhead_reserve(),
            chunk_safety_margin: default_chunk_safety_margin(),
            min_chunk_tokens: default_min_chunk_tokens(),
            reduce_budget: default_reduce_budget(),
            reduce_batch_max: default_reduce_batch_max(),
            max_concurrency: default_max_concurrency(),
            max_output_tokens: None,
        }
    }
}

impl Limits {
    /// Largest estimate that is still analysed in a single call.
    pub fn single_call_threshold(&self) -> usize {
        self.context_limit.saturating_sub(self.overhead_reserve)
    }

    /// Worker count for a stage with `units` independent calls.
    pub fn workers_for(&self, units: usize) -> usize {
        units.min(self.max_concurrency).max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.context_limit == 0 {
            return Err(ConfigError::Invalid("context_limit must be positive".into()));
        }
        if self.overhead_reserve >= self.context_limit {
            return Err(ConfigError::Invalid(
                "overhead_reserve must be smaller than context_limit".into(),
            ));
        }
        if self.reduce_budget == 0 || self.reduce_budget > self.context_limit {
            return Err(ConfigError::Invalid(
                "reduce_budget must be in 1..=context_limit".into(),
            ));
        }
        if self.reduce_batch_max < 2 {
            return Err(ConfigError::Invalid(
                "reduce_batch_max must be at least 2 or reduction cannot converge".into(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be positive".into()));
        }
        if self.min_chunk_tokens == 0 {
            return Err(ConfigError::Invalid("min_chunk_tokens must be positive".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Scanner
// =============================================================================

/// Settings for the filesystem corpus provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScanConfig {
    /// Per-file estimate above which content is truncated (default: 4,000).
    #[serde(default = "default_file_token_limit")]
    pub file_token_limit: usize,
    /// Files larger than this are replaced by a placeholder (default: 1 MiB).
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Extra glob patterns to skip, matched against relative paths and names.
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_file_token_limit() -> usize {
    4_000
}
fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            file_token_limit: default_file_token_limit(),
            max_file_bytes: default_max_file_bytes(),
            exclude: Vec::new(),
        }
    }
}

// =============================================================================
// Top level
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AnalyzerConfig {
    /// OpenRouter model id (default: google/gemini-2.5-flash-lite).
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub scan: ScanConfig,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            limits: Limits::default(),
            scan: ScanConfig::default(),
        }
    }
}

impl AnalyzerConfig {
    /// Read a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)?.with_env_overrides()
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.limits.validate()?;
        Ok(config)
    }

    /// `DIGEST_MODEL` replaces the model; `DIGEST_CONTEXT_LIMIT` and
    /// `DIGEST_MAX_CONCURRENCY` replace the matching limits.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(model) = env_nonempty("DIGEST_MODEL") {
            self.model = model;
        }
        if let Some(v) = env_nonempty("DIGEST_CONTEXT_LIMIT") {
            self.limits.context_limit = parse_env("DIGEST_CONTEXT_LIMIT", &v)?;
        }
        if let Some(v) = env_nonempty("DIGEST_MAX_CONCURRENCY") {
            self.limits.max_concurrency = parse_env("DIGEST_MAX_CONCURRENCY", &v)?;
        }
        self.limits.validate()?;
        Ok(self)
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env(key: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key} must be an integer, got {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_model_window() {
        let limits = Limits::default();
        assert_eq!(limits.context_limit, 131_072);
        assert_eq!(limits.single_call_threshold(), 123_072);
        assert_eq!(limits.reduce_budget, 90_000);
        assert_eq!(limits.reduce_batch_max, 20);
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = AnalyzerConfig::from_toml_str(
            r#"
model = "openai/gpt-4.1-mini"

[limits]
reduce_budget = 40000

[scan]
exclude = ["*.lock", "fixtures/**"]
"#,
        )
        .unwrap();
        assert_eq!(config.model, "openai/gpt-4.1-mini");
        assert_eq!(config.limits.reduce_budget, 40_000);
        assert_eq!(config.limits.context_limit, 131_072);
        assert_eq!(config.scan.file_token_limit, 4_000);
        assert_eq!(config.scan.exclude.len(), 2);
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(
            AnalyzerConfig::from_toml_str("").unwrap(),
            AnalyzerConfig::default()
        );
    }

    #[test]
    fn invalid_limits_are_rejected() {
        let err = AnalyzerConfig::from_toml_str("[limits]\nreduce_batch_max = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = AnalyzerConfig::from_toml_str("[limits]\ncontext_limit = \"big\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn workers_are_bounded() {
        let limits = Limits::default();
        assert_eq!(limits.workers_for(3), 3);
        assert_eq!(limits.workers_for(30), 8);
        assert_eq!(limits.workers_for(0), 1);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = AnalyzerConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
