//! The language backend seam.
//!
//! A [`LanguageBackend`] turns a prompt into text.  Implementations are
//! interchangeable and chosen at construction:
//!
//! - [`OllamaBackend`][crate::ollama::OllamaBackend] – a local Ollama server.
//! - [`LocalBackend`][crate::local::LocalBackend] – an offline, deterministic
//!   stand-in that answers in the structured action format.
//!
//! # State machine
//!
//! ```text
//!   Unloaded ──load() ok──▶ Loaded ──unload()──▶ Unloaded
//! ```
//!
//! [`generate`][LanguageBackend::generate] is only valid while loaded and
//! fails with [`BackendError::NotLoaded`] otherwise.

use std::time::Duration;

use async_trait::async_trait;
use hearth_types::HearthError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors a [`LanguageBackend`] may return.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("backend is not loaded")]
    NotLoaded,
    /// The model server could not be reached.
    #[error("cannot reach model server: {0}")]
    Connection(String),
    /// The server is reachable but the model did not answer a smoke test.
    #[error("model {model} unavailable: {reason}")]
    ModelUnavailable { model: String, reason: String },
    #[error("generation exceeded {0:?}")]
    Timeout(Duration),
    /// The response body was not in the expected shape.
    #[error("malformed response: {0}")]
    Decode(String),
    /// The server reported an error.
    #[error("model server error: {0}")]
    Upstream(String),
}

impl From<BackendError> for HearthError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotLoaded => HearthError::NotLoaded,
            BackendError::Connection(m) => HearthError::Connection(m),
            BackendError::ModelUnavailable { model, reason } => {
                HearthError::ModelUnavailable { model, reason }
            }
            e @ BackendError::Timeout(_) => HearthError::Timeout(e.to_string()),
            BackendError::Decode(m) => HearthError::Decode(m),
            BackendError::Upstream(m) => HearthError::Upstream(m),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Generation parameters
// ─────────────────────────────────────────────────────────────────────────────

/// Sampling parameters passed through to the backend unvalidated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            stop_sequences: vec!["</response>".into(), "Human:".into(), "User:".into()],
        }
    }
}

/// Description of the model behind a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model name, e.g. `"llama3.2"`.
    pub name: String,
    /// Backend kind, e.g. `"ollama"` or `"local"`.
    pub backend: String,
    pub loaded: bool,
    /// Server endpoint, for network backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// LanguageBackend
// ─────────────────────────────────────────────────────────────────────────────

/// Interchangeable text-generation engine.
#[async_trait]
pub trait LanguageBackend: Send + Sync {
    /// Bring the backend into the loaded state.
    async fn load(&self) -> Result<(), BackendError>;

    /// Return to the unloaded state.  Idempotent.
    async fn unload(&self);

    fn is_loaded(&self) -> bool;

    /// Produce text for `prompt`.
    async fn generate(&self, prompt: &str, config: &GenerationConfig)
    -> Result<String, BackendError>;

    fn describe_model(&self) -> ModelInfo;
}
