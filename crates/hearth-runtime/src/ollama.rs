//! [`OllamaBackend`] – Ollama `/api/generate` client.
//!
//! # Loading
//!
//! [`load`][LanguageBackend::load] performs two checks:
//!
//! 1. `GET /api/tags` – reachability.  Failure → [`BackendError::Connection`].
//! 2. `POST /api/generate` with `num_predict: 1` – the configured model can
//!    actually answer.  Failure → [`BackendError::ModelUnavailable`].
//!
//! # Generation
//!
//! Each call is bounded by the configured deadline
//! ([`tokio::time::timeout`]).  Expiry → [`BackendError::Timeout`], a body
//! that is not a generate response → [`BackendError::Decode`], an `error`
//! field or non-success status → [`BackendError::Upstream`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use hearth_runtime::{GenerationConfig, LanguageBackend, OllamaBackend};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = OllamaBackend::new("http://localhost:11434", "llama3.2", Duration::from_secs(30));
//! backend.load().await?;
//! let text = backend.generate("Say hi", &GenerationConfig::default()).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{BackendError, GenerationConfig, LanguageBackend, ModelInfo};

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct GenerateOptions<'a> {
    num_predict: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    stop: &'a [String],
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions<'a>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// OllamaBackend
// ─────────────────────────────────────────────────────────────────────────────

/// Network [`LanguageBackend`] backed by an Ollama server.
pub struct OllamaBackend {
    base_url: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
    loaded: AtomicBool,
}

impl OllamaBackend {
    /// Create a backend for `model` served at `base_url`
    /// (e.g. `"http://localhost:11434"`), with `timeout` bounding every call.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout,
            client: reqwest::Client::new(),
            loaded: AtomicBool::new(false),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn probe(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .get(self.url("/api/tags"))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        if !response.status().is_success() {
            return Err(BackendError::Connection(format!(
                "/api/tags returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// One `/api/generate` round trip, without the deadline.
    async fn post_generate(&self, body: &GenerateRequest<'_>) -> Result<String, BackendError> {
        let response = self
            .client
            .post(self.url("/api/generate"))
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or(text);
            return Err(BackendError::Upstream(format!("HTTP {status}: {detail}")));
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&text).map_err(|e| BackendError::Decode(e.to_string()))?;
        if let Some(error) = parsed.error {
            return Err(BackendError::Upstream(error));
        }
        parsed
            .response
            .ok_or_else(|| BackendError::Decode("missing 'response' field".into()))
    }

    async fn generate_with_deadline(
        &self,
        body: &GenerateRequest<'_>,
    ) -> Result<String, BackendError> {
        tokio::time::timeout(self.timeout, self.post_generate(body))
            .await
            .map_err(|_| BackendError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl LanguageBackend for OllamaBackend {
    async fn load(&self) -> Result<(), BackendError> {
        self.probe().await?;

        let smoke = GenerateRequest {
            model: &self.model,
            prompt: "Hello",
            stream: false,
            options: GenerateOptions {
                num_predict: 1,
                temperature: None,
                top_p: None,
                top_k: None,
                stop: &[],
            },
        };
        self.generate_with_deadline(&smoke)
            .await
            .map_err(|e| BackendError::ModelUnavailable {
                model: self.model.clone(),
                reason: e.to_string(),
            })?;

        self.loaded.store(true, Ordering::Release);
        info!(model = %self.model, url = %self.base_url, "ollama backend loaded");
        Ok(())
    }

    async fn unload(&self) {
        if self.loaded.swap(false, Ordering::AcqRel) {
            info!(model = %self.model, "ollama backend unloaded");
        }
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    async fn generate(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<String, BackendError> {
        if !self.is_loaded() {
            return Err(BackendError::NotLoaded);
        }
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: config.max_tokens,
                temperature: Some(config.temperature),
                top_p: Some(config.top_p),
                top_k: Some(config.top_k),
                stop: &config.stop_sequences,
            },
        };
        debug!(model = %self.model, prompt_len = prompt.len(), "generating");
        let result = self.generate_with_deadline(&body).await;
        if let Err(e) = &result {
            warn!(model = %self.model, error = %e, "generation failed");
        }
        result
    }

    fn describe_model(&self) -> ModelInfo {
        ModelInfo {
            name: self.model.clone(),
            backend: "ollama".into(),
            loaded: self.is_loaded(),
            endpoint: Some(self.base_url.clone()),
        }
    }
}
