//! Model adapters
//!
//! A [`ModelAdapter`] wraps one inference backend behind a uniform call:
//! prepared artifact + model config in, structured [`ModelJudgment`] out.
//! Adapters are stateless with respect to the store; persisting results is
//! the scheduler's job.
//!
//! - [`ollama`]: HTTP adapter for a local Ollama server
//! - [`schema`]: strict mapping of raw model output onto the judgment schema
//! - [`retry`]: the one retry policy shared by every adapter

pub mod ollama;
pub mod retry;
pub mod schema;

pub use ollama::OllamaAdapter;
pub use retry::{RetryOutcome, RetryPolicy};
pub use schema::{Anomaly, JudgmentSchema};

use crate::cache::PreparedArtifact;
use crate::error::AdapterError;
use crate::models::ModelJudgment;
use async_trait::async_trait;
use std::time::Duration;

/// Per-model call configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// Identifier recorded with every result
    pub model_id: String,
    /// Name the backend knows the model by (e.g. "llava:13b")
    pub backend_model: String,
    pub prompt: String,
    /// Per-call timeout; expiry is a transient error
    pub timeout: Duration,
    pub max_output_tokens: u32,
    /// Truncate descriptions to this many characters
    pub max_output_chars: Option<usize>,
    pub temperature: f32,
    pub requests_per_second: Option<u32>,
}

impl ModelConfig {
    /// Minimal config with default limits, used by tests and ad hoc callers
    pub fn new(model_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        let model_id = model_id.into();
        Self {
            backend_model: model_id.clone(),
            model_id,
            prompt: prompt.into(),
            timeout: Duration::from_secs(300),
            max_output_tokens: 2000,
            max_output_chars: None,
            temperature: 0.2,
            requests_per_second: None,
        }
    }
}

/// Successful adapter output
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub judgment: ModelJudgment,
    /// Data-quality problems found (and repaired) while mapping the output
    pub anomalies: Vec<Anomaly>,
}

/// Uniform interface over one inference backend
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Backend name for logs ("ollama", "mock", ...)
    fn name(&self) -> &'static str;

    /// Run one inference
    ///
    /// # Errors
    /// - `Transient` on network failure or timeout (retryable)
    /// - `Permanent` on unsupported input or unknown model (never retried)
    /// - `Parse` when the output cannot be mapped onto the schema
    async fn analyze(
        &self,
        artifact: &PreparedArtifact,
        config: &ModelConfig,
    ) -> Result<Analysis, AdapterError>;

    /// Wait for the adapter's request budget (rate limit) to admit one call
    ///
    /// Batch callers await this before each `analyze`, outside the inference
    /// timeout; `analyze` itself does not pace.
    async fn acquire_permit(&self) {}

    /// Verify the backend is reachable and serves `config.backend_model`
    async fn health_check(&self, _config: &ModelConfig) -> Result<(), AdapterError> {
        Ok(())
    }
}
