use crate::errors::{PipelineError, PipelineResult};
use crate::executor::DEFAULT_EXECUTION_TIMEOUT;
use crate::model::DEFAULT_MAX_ROWS;
use crate::orchestrator::DEFAULT_REQUEST_DEADLINE;
use crate::providers::Provider;
use crate::rate_limit::RateLimit;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;
pub const DEFAULT_CONFIG_PATH: &str = "nl2sql.yaml";
pub const CONFIG_PATH_ENV: &str = "NL2SQL_CONFIG";

fn config_error(message: impl Into<String>) -> PipelineError {
    PipelineError::Config {
        message: message.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub version: u32,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub examples: ExamplesConfig,
    #[serde(default)]
    pub embedder: EmbedderConfig,
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub cache: Option<CacheConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
}

fn default_execution_timeout_secs() -> u64 {
    DEFAULT_EXECUTION_TIMEOUT.as_secs()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamplesConfig {
    #[serde(default = "default_example_store")]
    pub store: PathBuf,
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
}

fn default_example_store() -> PathBuf {
    PathBuf::from(".nl2sql/examples.db")
}

impl Default for ExamplesConfig {
    fn default() -> Self {
        Self {
            store: default_example_store(),
            seed_file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Openai,
    /// Offline stand-in; deterministic output for demos and tests.
    Fake,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedderConfig {
    #[serde(default)]
    pub kind: BackendKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub dimensions: Option<usize>,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            base_url: None,
            model: default_embedding_model(),
            api_key_env: default_api_key_env(),
            dimensions: None,
        }
    }
}

impl EmbedderConfig {
    pub fn api_key(&self) -> PipelineResult<String> {
        read_api_key(&self.api_key_env, "embedder")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    #[serde(default)]
    pub requests_per_day: Option<u32>,
}

impl RateLimitConfig {
    pub fn to_rate_limit(&self) -> RateLimit {
        let limit = RateLimit::per_minute(self.requests_per_minute);
        match self.requests_per_day {
            Some(daily) => limit.with_daily_limit(daily),
            None => limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub slot: Provider,
    #[serde(default)]
    pub kind: BackendKind,
    #[serde(default)]
    pub base_url: Option<String>,
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// Canned answers for `kind: fake`, returned in order; the last one repeats.
    #[serde(default)]
    pub responses: Vec<String>,
}

fn default_max_tokens() -> u32 {
    512
}

fn default_provider_timeout_secs() -> u64 {
    30
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn api_key(&self) -> PipelineResult<String> {
        read_api_key(&self.api_key_env, self.slot.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_request_deadline_secs")]
    pub request_deadline_secs: u64,
    #[serde(default = "default_max_rows")]
    pub default_max_rows: usize,
    #[serde(default)]
    pub max_rate_wait_secs: u64,
}

fn default_request_deadline_secs() -> u64 {
    DEFAULT_REQUEST_DEADLINE.as_secs()
}

fn default_max_rows() -> usize {
    DEFAULT_MAX_ROWS
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            request_deadline_secs: default_request_deadline_secs(),
            default_max_rows: default_max_rows(),
            max_rate_wait_secs: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

fn read_api_key(var: &str, owner: &str) -> PipelineResult<String> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(config_error(format!(
            "{owner}: environment variable {var} is not set"
        ))),
    }
}

impl AppConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.version != SUPPORTED_CONFIG_VERSION {
            return Err(config_error(format!(
                "unsupported config version {} (supported: {})",
                self.version, SUPPORTED_CONFIG_VERSION
            )));
        }
        if self.providers.is_empty() {
            return Err(config_error("config has no providers"));
        }
        let mut seen = BTreeSet::new();
        for p in &self.providers {
            if !seen.insert(p.slot) {
                return Err(config_error(format!("provider slot {} configured twice", p.slot)));
            }
            if p.timeout_secs == 0 {
                return Err(config_error(format!("provider {}: timeout_secs must be > 0", p.slot)));
            }
            if let Some(rl) = &p.rate_limit {
                if rl.requests_per_minute == 0 || rl.requests_per_day == Some(0) {
                    return Err(config_error(format!(
                        "provider {}: rate limits must be > 0",
                        p.slot
                    )));
                }
            }
        }
        if self.database.execution_timeout_secs == 0 {
            return Err(config_error("database.execution_timeout_secs must be > 0"));
        }
        if self.pipeline.request_deadline_secs == 0 {
            return Err(config_error("pipeline.request_deadline_secs must be > 0"));
        }
        if self.pipeline.default_max_rows == 0 {
            return Err(config_error("pipeline.default_max_rows must be > 0"));
        }
        if self.embedder.dimensions == Some(0) {
            return Err(config_error("embedder.dimensions must be > 0"));
        }
        if matches!(&self.cache, Some(c) if c.ttl_secs == 0) {
            return Err(config_error("cache.ttl_secs must be > 0"));
        }
        Ok(())
    }

    /// Provider slots in fallback order.
    pub fn provider_order(&self) -> Vec<Provider> {
        let mut slots: Vec<Provider> = self.providers.iter().map(|p| p.slot).collect();
        slots.sort();
        slots
    }

    /// Resolves relative paths against the directory holding the config file.
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.database.path);
        resolve(&mut self.examples.store);
        if let Some(seed) = self.examples.seed_file.as_mut() {
            resolve(seed);
        }
    }
}

/// Config path from `--config`, then `NL2SQL_CONFIG`, then the default.
pub fn config_path(cli: Option<&Path>) -> PathBuf {
    if let Some(p) = cli {
        return p.to_path_buf();
    }
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

pub fn load_config(path: &Path) -> PipelineResult<AppConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| config_error(format!("failed to read config {}: {}", path.display(), e)))?;
    let mut cfg: AppConfig = serde_yaml::from_str(&raw)
        .map_err(|e| config_error(format!("failed to parse YAML: {}", e)))?;
    cfg.validate()?;
    if let Some(base) = path.parent() {
        cfg.resolve_paths(base);
    }
    Ok(cfg)
}

pub fn write_sample_config(path: &Path) -> PipelineResult<()> {
    std::fs::write(path, include_str!("../../../nl2sql.yaml"))
        .map_err(|e| config_error(format!("failed to write sample config: {}", e)))?;
    Ok(())
}
