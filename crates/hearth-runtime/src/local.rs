//! [`LocalBackend`] – offline stand-in for a real model.
//!
//! Reads the `User request:` line out of the prompt and answers with a
//! structured action object chosen by simple phrase matching.  Output is
//! fully deterministic, which makes it useful for tests, demos and running
//! without a model server.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use crate::backend::{BackendError, GenerationConfig, LanguageBackend, ModelInfo};

/// Marker the interpreter puts in front of the current utterance.
pub const USER_REQUEST_MARKER: &str = "User request:";

/// Deterministic, pattern-based [`LanguageBackend`].
#[derive(Default)]
pub struct LocalBackend {
    loaded: AtomicBool,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn utterance_from_prompt(prompt: &str) -> &str {
    prompt
        .lines()
        .rev()
        .find_map(|l| l.trim().strip_prefix(USER_REQUEST_MARKER))
        .unwrap_or(prompt)
        .trim()
}

/// First number-looking token, ignoring units such as `°C` or `%`.
fn first_number(text: &str) -> Option<f64> {
    text.split_whitespace().find_map(|token| {
        token
            .trim_matches(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
            .parse::<f64>()
            .ok()
    })
}

/// Requested brightness on the 0-255 scale.  A percentage (`30%`,
/// `30 percent`) is scaled; a bare number is taken as-is.
fn brightness_level(text: &str) -> Option<f64> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    tokens.iter().enumerate().find_map(|(i, token)| {
        let value = token
            .trim_matches(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
            .parse::<f64>()
            .ok()?;
        let percent = token.contains('%')
            || tokens.get(i + 1).is_some_and(|next| next.starts_with("percent"));
        Some(if percent { (value * 255.0 / 100.0).round() } else { value })
    })
}

fn has_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

fn reply(understanding: &str, response: &str, actions: Value, confidence: f64) -> String {
    json!({
        "understanding": understanding,
        "response": response,
        "actions": actions,
        "confidence": confidence,
    })
    .to_string()
}

/// Build the canned answer for one utterance.
fn respond(utterance: &str) -> String {
    let text = utterance.to_lowercase();
    let lights = has_any(&text, &["light", "lamp"]);
    let covers = has_any(&text, &["blind", "curtain", "garage", "shade", "cover"]);

    if (text.contains("brightness") || (lights && (text.contains('%') || text.contains("percent"))))
        && let Some(value) = brightness_level(&text)
    {
        return reply(
            "set light brightness",
            &format!("Setting the brightness to {value}."),
            json!([{"action": "set_brightness", "parameters": {"brightness": value}}]),
            0.8,
        );
    }
    if lights && text.contains("dim") {
        return reply(
            "dim the lights",
            "I'll dim the lights for you.",
            json!([{"action": "set_brightness", "parameters": {"brightness": 128}}]),
            0.8,
        );
    }
    if lights && text.contains("off") {
        return reply(
            "turn off lights",
            "I'll turn off the lights for you.",
            json!([{"action": "turn_off", "parameters": {}}]),
            0.9,
        );
    }
    if lights && text.contains("on") {
        return reply(
            "turn on lights",
            "I'll turn on the lights for you.",
            json!([{"action": "turn_on", "parameters": {}}]),
            0.9,
        );
    }
    if has_any(&text, &["temperature", "thermostat", "heating", "degrees"]) {
        let value = first_number(&text).unwrap_or(22.0);
        return reply(
            "change the temperature",
            &format!("I'll set the temperature to {value}°C."),
            json!([{"action": "set_temperature", "parameters": {"temperature": value}}]),
            0.8,
        );
    }
    if covers && has_any(&text, &["close", "shut", "lower"]) {
        return reply(
            "close covers",
            "Closing it now.",
            json!([{"action": "close", "parameters": {}}]),
            0.8,
        );
    }
    if covers && has_any(&text, &["open", "raise"]) {
        return reply(
            "open covers",
            "Opening it now.",
            json!([{"action": "open", "parameters": {}}]),
            0.8,
        );
    }
    if has_any(&text, &["music", "play"]) {
        return reply(
            "start media playback",
            "Starting the music.",
            json!([{"action": "turn_on", "parameters": {}}]),
            0.6,
        );
    }
    if has_any(&text, &["status", "what", "which"]) {
        return reply(
            "status request",
            "I can control lights, switches, fans, climate and covers. Ask me to turn something on or off, dim lights, or set the temperature.",
            json!([]),
            0.7,
        );
    }
    reply(
        "unclear request",
        "I'm not sure what you'd like me to do. Could you be more specific?",
        json!([]),
        0.3,
    )
}

#[async_trait]
impl LanguageBackend for LocalBackend {
    async fn load(&self) -> Result<(), BackendError> {
        self.loaded.store(true, Ordering::Release);
        info!("local backend loaded");
        Ok(())
    }

    async fn unload(&self) {
        self.loaded.store(false, Ordering::Release);
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    async fn generate(&self, prompt: &str, _config: &GenerationConfig) -> Result<String, BackendError> {
        if !self.is_loaded() {
            return Err(BackendError::NotLoaded);
        }
        Ok(respond(utterance_from_prompt(prompt)))
    }

    fn describe_model(&self) -> ModelInfo {
        ModelInfo {
            name: "local-patterns".into(),
            backend: "local".into(),
            loaded: self.is_loaded(),
            endpoint: None,
        }
    }
}
