//! `hearth-runtime` – language backends and the message pipeline.
//!
//! # Modules
//!
//! - [`backend`] – the [`LanguageBackend`] trait, [`GenerationConfig`] and
//!   [`BackendError`].
//! - [`ollama`] – [`OllamaBackend`]: an Ollama `/api/generate` client with a
//!   reachability probe and a one-token smoke test on load.
//! - [`local`] – [`LocalBackend`]: an offline, deterministic backend that
//!   answers in the structured action format.
//! - [`interpreter`] – [`ResponseInterpreter`]: builds the prompt (action
//!   vocabulary, known devices, bounded history, JSON Schema of the reply
//!   contract) and turns backend text into actions, degrading to a keyword
//!   scan when the text is not valid JSON.
//! - [`service`] – [`HomeService`]: the end-to-end turn.  Recalls the
//!   conversation, interprets, validates, resolves target devices, dispatches
//!   through [`DeviceRegistry`][hearth_hal::DeviceRegistry] and records the
//!   outcome.
//!
//! # Safety gating
//!
//! Every action produced by the interpreter passes the
//! [`SafetyValidator`][hearth_kernel::SafetyValidator] before a device is
//! chosen, and again inside the registry before the gateway is called.

pub mod backend;
pub mod interpreter;
pub mod local;
pub mod ollama;
pub mod service;

pub use backend::{BackendError, GenerationConfig, LanguageBackend, ModelInfo};
pub use interpreter::{
    Interpretation, InterpretationSource, ResponseInterpreter, StructuredReply, TurnContext,
};
pub use local::LocalBackend;
pub use ollama::OllamaBackend;
pub use service::{
    ActionOutcome, ActionStatus, ChatRequest, ChatResponse, HealthReport, HomeService,
};
