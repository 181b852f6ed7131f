//! Ollama adapter
//!
//! Calls `POST {host}/api/generate` with the prepared image inlined as
//! base64 and `format: "json"`, then maps the `response` text through
//! [`JudgmentSchema`].
//!
//! # Error mapping
//! - timeout, connection failure, HTTP 5xx/429 → `Transient`
//! - HTTP 404 (model not pulled) and other 4xx → `Permanent`
//! - unparseable envelope or response text → `Parse`

use crate::adapters::schema::JudgmentSchema;
use crate::adapters::{Analysis, ModelAdapter, ModelConfig};
use crate::cache::PreparedArtifact;
use crate::error::AdapterError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use tracing::debug;
use vigil_common::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<String>,
    stream: bool,
    format: &'static str,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// HTTP adapter for an Ollama inference server
pub struct OllamaAdapter {
    client: Client,
    host: String,
    rate_limiter: Option<DirectRateLimiter>,
}

impl OllamaAdapter {
    /// Create adapter for `host` (e.g. `http://localhost:11434`)
    pub fn new(host: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
            rate_limiter: None,
        })
    }

    /// Admit at most `per_second` generate calls per second through
    /// [`ModelAdapter::acquire_permit`]
    pub fn with_rate_limit(mut self, per_second: Option<u32>) -> Self {
        self.rate_limiter = per_second
            .and_then(NonZeroU32::new)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn classify_send_error(err: reqwest::Error, timeout: Duration) -> AdapterError {
        if err.is_timeout() {
            AdapterError::Transient(format!("Request timed out after {}s", timeout.as_secs_f64()))
        } else if err.is_connect() {
            AdapterError::Transient(format!("Connection failed: {}", err))
        } else {
            AdapterError::Transient(format!("Request failed: {}", err))
        }
    }

    fn classify_status(status: StatusCode, body: &str, model: &str) -> AdapterError {
        let snippet: String = body.chars().take(200).collect();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            AdapterError::Transient(format!("Backend returned {}: {}", status, snippet))
        } else if status == StatusCode::NOT_FOUND {
            AdapterError::Permanent(format!(
                "Model '{}' not available on backend: {}",
                model, snippet
            ))
        } else {
            AdapterError::Permanent(format!("Backend rejected request ({}): {}", status, snippet))
        }
    }
}

/// Whether an installed model tag satisfies the configured name
fn model_matches(installed: &str, wanted: &str) -> bool {
    installed == wanted || (!wanted.contains(':') && installed == format!("{}:latest", wanted))
}

#[async_trait]
impl ModelAdapter for OllamaAdapter {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn analyze(
        &self,
        artifact: &PreparedArtifact,
        config: &ModelConfig,
    ) -> std::result::Result<Analysis, AdapterError> {
        let bytes = tokio::fs::read(&artifact.path).await.map_err(|e| {
            AdapterError::Transient(format!(
                "Read prepared artifact {}: {}",
                artifact.path.display(),
                e
            ))
        })?;

        let request = GenerateRequest {
            model: &config.backend_model,
            prompt: &config.prompt,
            images: vec![BASE64.encode(&bytes)],
            stream: false,
            format: "json",
            options: GenerateOptions {
                temperature: config.temperature,
                num_predict: config.max_output_tokens,
            },
        };

        let started = Instant::now();
        let url = format!("{}/api/generate", self.host);
        debug!(
            model = %config.model_id,
            url = %url,
            bytes = bytes.len(),
            "Sending generate request"
        );

        let response = self
            .client
            .post(&url)
            .timeout(config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::classify_send_error(e, config.timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Self::classify_send_error(e, config.timeout))?;

        if !status.is_success() {
            return Err(Self::classify_status(status, &body, &config.backend_model));
        }

        let envelope: GenerateResponse = serde_json::from_str(&body).map_err(|e| {
            AdapterError::parse(format!("Unexpected backend envelope: {}", e), body.clone())
        })?;

        debug!(
            model = %config.model_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            done = envelope.done,
            "Generate response received"
        );

        JudgmentSchema::new(config.max_output_chars).parse(&envelope.response)
    }

    async fn acquire_permit(&self) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }
    }

    async fn health_check(&self, config: &ModelConfig) -> std::result::Result<(), AdapterError> {
        let url = format!("{}/api/tags", self.host);
        let response = self
            .client
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| Self::classify_send_error(e, HEALTH_TIMEOUT))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body, &config.backend_model));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Transient(format!("Unreadable model list: {}", e)))?;

        if tags.models.iter().any(|m| model_matches(&m.name, &config.backend_model)) {
            Ok(())
        } else {
            Err(AdapterError::Permanent(format!(
                "Model '{}' is not installed (available: {})",
                config.backend_model,
                tags.models.iter().map(|m| m.name.as_str()).collect::<Vec<_>>().join(", ")
            )))
        }
    }
}
