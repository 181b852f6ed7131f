//! Configuration for vigil-ai
//!
//! Resolution: built-in defaults, overlaid by the TOML file found through
//! `vigil_common::config::resolve_config_path`, overlaid by environment
//! (`OLLAMA_HOST`), overlaid by CLI flags at the call site.

use crate::adapters::retry::RetryPolicy;
use crate::adapters::schema::DEFAULT_PROMPT;
use crate::adapters::ModelConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use vigil_common::config::{default_data_dir, load_toml_config, resolve_config_path, LoggingConfig};
use vigil_common::{Error, Result};

/// Environment override for the inference backend address
pub const BACKEND_HOST_ENV_VAR: &str = "OLLAMA_HOST";

pub const DEFAULT_BACKEND_HOST: &str = "http://localhost:11434";

/// Complete vigil-ai configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub backend: BackendConfig,
    pub models: Vec<ModelEntry>,
    pub retry: RetryPolicy,
    pub scheduler: SchedulerConfig,
    pub fusion: FusionConfig,
    pub logging: LoggingConfig,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            backend: BackendConfig::default(),
            models: vec![
                ModelEntry::named("llava", "llava:latest"),
                ModelEntry::named("gemma3", "gemma3:12b"),
            ],
            retry: RetryPolicy::default(),
            scheduler: SchedulerConfig::default(),
            fusion: FusionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file; defaults to `<data dir>/vigil.db`
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root; defaults to `<data dir>/cache`
    pub dir: Option<PathBuf>,
    /// Longest edge of standardized artifacts (pixels)
    pub max_size: u32,
    pub jpeg_quality: u8,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_size: 896,
            jpeg_quality: 95,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub host: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BACKEND_HOST.to_string(),
        }
    }
}

/// One `[[models]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Identifier stored with every result (e.g. "llava")
    pub id: String,
    /// Backend model name; defaults to `id`
    #[serde(default)]
    pub model: Option<String>,
    /// Inline prompt template
    #[serde(default)]
    pub prompt: Option<String>,
    /// Prompt template file, resolved relative to the config file
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Truncate stored descriptions to this many characters
    #[serde(default)]
    pub max_output_chars: Option<usize>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Request rate limit for this model (requests per second)
    #[serde(default)]
    pub requests_per_second: Option<u32>,
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_output_tokens() -> u32 {
    2000
}

fn default_temperature() -> f32 {
    0.2
}

impl ModelEntry {
    pub fn named(id: &str, model: &str) -> Self {
        Self {
            id: id.to_string(),
            model: Some(model.to_string()),
            prompt: None,
            prompt_file: None,
            timeout_secs: default_timeout_secs(),
            max_output_tokens: default_max_output_tokens(),
            max_output_chars: None,
            temperature: default_temperature(),
            requests_per_second: None,
        }
    }

    /// Build the adapter-facing config, reading `prompt_file` if set
    pub fn resolve(&self, base_dir: Option<&Path>) -> Result<ModelConfig> {
        let prompt = match (&self.prompt, &self.prompt_file) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(format!(
                    "Model '{}' sets both prompt and prompt_file",
                    self.id
                )))
            }
            (Some(inline), None) => inline.clone(),
            (None, Some(file)) => {
                let path = match base_dir {
                    Some(dir) if file.is_relative() => dir.join(file),
                    _ => file.clone(),
                };
                std::fs::read_to_string(&path).map_err(|e| {
                    Error::Config(format!(
                        "Model '{}': read prompt {} failed: {}",
                        self.id,
                        path.display(),
                        e
                    ))
                })?
            }
            (None, None) => DEFAULT_PROMPT.to_string(),
        };

        Ok(ModelConfig {
            model_id: self.id.clone(),
            backend_model: self.model.clone().unwrap_or_else(|| self.id.clone()),
            prompt,
            timeout: Duration::from_secs(self.timeout_secs),
            max_output_tokens: self.max_output_tokens,
            max_output_chars: self.max_output_chars,
            temperature: self.temperature,
            requests_per_second: self.requests_per_second,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker pool size
    pub concurrency: usize,
    /// Emit a progress log line every N completed items
    pub progress_interval: usize,
    /// Upper bound on retrying a locked store write
    pub max_lock_wait_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            progress_interval: 10,
            max_lock_wait_ms: crate::utils::db_retry::DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }
}

/// Ensemble fusion tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Models whose results make up a full quorum; empty = all configured
    pub required_models: Vec<String>,
    /// Fuse on fewer results than required (flagged low-confidence)
    pub min_quorum: Option<usize>,
    /// Lower bound of the agreement factor applied to mean confidence
    pub agreement_floor: f64,
    pub review_confidence_threshold: f64,
    pub review_indicator_threshold: usize,
    /// Cap on merged indicators kept per verdict
    pub max_indicators: Option<usize>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            required_models: Vec::new(),
            min_quorum: None,
            agreement_floor: 0.5,
            review_confidence_threshold: 0.75,
            review_indicator_threshold: 5,
            max_indicators: None,
        }
    }
}

impl VigilConfig {
    /// Resolve, load, apply environment overrides and validate
    ///
    /// Returns the config and the file it came from (None = defaults).
    pub fn load(cli_path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let path = resolve_config_path(cli_path)?;
        let mut config: VigilConfig = match &path {
            Some(p) => {
                info!(path = %p.display(), "Loading configuration");
                load_toml_config(p)?
            }
            None => {
                info!("No config file found, using built-in defaults");
                VigilConfig::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok((config, path))
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var(BACKEND_HOST_ENV_VAR) {
            let host = host.trim();
            if !host.is_empty() {
                let host = if host.starts_with("http://") || host.starts_with("https://") {
                    host.to_string()
                } else {
                    format!("http://{}", host)
                };
                info!(host = %host, "Backend host overridden from {}", BACKEND_HOST_ENV_VAR);
                self.backend.host = host;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(Error::Config("No models configured".to_string()));
        }

        let mut seen = HashSet::new();
        for entry in &self.models {
            if entry.id.trim().is_empty() {
                return Err(Error::Config("Model id must not be empty".to_string()));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(Error::Config(format!("Duplicate model id: {}", entry.id)));
            }
            if entry.timeout_secs == 0 {
                return Err(Error::Config(format!(
                    "Model '{}': timeout_secs must be > 0",
                    entry.id
                )));
            }
            if entry.requests_per_second == Some(0) {
                return Err(Error::Config(format!(
                    "Model '{}': requests_per_second must be > 0",
                    entry.id
                )));
            }
        }

        if self.scheduler.concurrency == 0 {
            return Err(Error::Config("scheduler.concurrency must be > 0".to_string()));
        }

        self.retry.validate()?;

        for required in &self.fusion.required_models {
            if !seen.contains(required.as_str()) {
                return Err(Error::Config(format!(
                    "fusion.required_models names unknown model: {}",
                    required
                )));
            }
        }

        let required = self.required_models().len();
        if let Some(quorum) = self.fusion.min_quorum {
            if quorum == 0 {
                return Err(Error::Config("fusion.min_quorum must be > 0".to_string()));
            }
            if quorum > required {
                return Err(Error::Config(format!(
                    "fusion.min_quorum ({}) exceeds required model count ({})",
                    quorum, required
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.fusion.agreement_floor) {
            return Err(Error::Config("fusion.agreement_floor must be within [0, 1]".to_string()));
        }
        if !(0.0..=1.0).contains(&self.fusion.review_confidence_threshold) {
            return Err(Error::Config(
                "fusion.review_confidence_threshold must be within [0, 1]".to_string(),
            ));
        }

        if self.cache.max_size == 0 {
            return Err(Error::Config("cache.max_size must be > 0".to_string()));
        }
        if !(1..=100).contains(&self.cache.jpeg_quality) {
            return Err(Error::Config("cache.jpeg_quality must be within 1..=100".to_string()));
        }

        Ok(())
    }

    /// Model ids that make up a full fusion quorum
    pub fn required_models(&self) -> Vec<String> {
        if self.fusion.required_models.is_empty() {
            self.models.iter().map(|m| m.id.clone()).collect()
        } else {
            self.fusion.required_models.clone()
        }
    }

    pub fn model(&self, model_id: &str) -> Option<&ModelEntry> {
        self.models.iter().find(|m| m.id == model_id)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| default_data_dir().join("vigil.db"))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache.dir.clone().unwrap_or_else(|| default_data_dir().join("cache"))
    }
}
