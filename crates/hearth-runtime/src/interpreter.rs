//! [`ResponseInterpreter`] – prompt construction and reply parsing.
//!
//! The backend is asked for one JSON object matching [`StructuredReply`].
//! Whatever comes back is run through an explicit pipeline:
//!
//! ```text
//!   raw text ──extract_candidate──▶ JSON slice ──parse_structured──▶ StructuredReply
//!       │                                              │ (fails)
//!       └──────────────────────────────────────────────┴──▶ keyword_fallback
//! ```
//!
//! Unparseable text is never an error.  It degrades to at most one
//! keyword-derived action and the text itself becomes the reply.  When the
//! backend call fails outright, the same keyword table is run against the
//! user's utterance instead ([`rule_based`]).
//!
//! | Source | Trigger |
//! |---|---|
//! | [`InterpretationSource::Structured`] | reply parsed as the JSON contract |
//! | [`InterpretationSource::KeywordFallback`] | reply text was prose or malformed JSON |
//! | [`InterpretationSource::RuleBased`] | the backend call itself failed |

use std::fmt::Write as _;
use std::sync::Arc;

use hearth_types::{Context, Device, DeviceAction, HearthError, Message, Role};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{GenerationConfig, LanguageBackend};
use crate::local::USER_REQUEST_MARKER;

/// Number of prior messages embedded in the prompt.
pub const HISTORY_WINDOW: usize = 10;

/// Upper bound on devices listed in the prompt.
pub const MAX_PROMPT_DEVICES: usize = 50;

const DEFAULT_BRIGHTNESS: u64 = 128;
const DEFAULT_TEMPERATURE: u64 = 22;

const UNCLEAR_REPLY: &str = "I understand you want to control your smart home, but I'm not sure exactly what you'd like me to do. Could you be more specific?";
const STATUS_REPLY: &str = "I can control your lights, switches, fans, climate and covers. Ask me to turn something on or off, dim the lights, or set the temperature.";

// ─────────────────────────────────────────────────────────────────────────────
// Contract
// ─────────────────────────────────────────────────────────────────────────────

/// The JSON object the backend is asked to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StructuredReply {
    /// Brief restatement of what the user asked.
    #[serde(default)]
    pub understanding: Option<String>,
    /// Conversational answer shown to the user.
    pub response: String,
    /// Device actions to perform, possibly empty.
    pub actions: Vec<DeviceAction>,
    /// Self-reported confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Which stage of the pipeline produced an [`Interpretation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpretationSource {
    Structured,
    KeywordFallback,
    RuleBased,
}

/// Reply text plus the actions extracted for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    pub understanding: Option<String>,
    pub reply: String,
    pub actions: Vec<DeviceAction>,
    pub confidence: Option<f64>,
    pub source: InterpretationSource,
}

/// Prior state made available to the prompt.
#[derive(Debug, Clone, Copy)]
pub struct TurnContext<'a> {
    pub history: &'a [Message],
    pub context: &'a Context,
    pub devices: &'a [Device],
}

// ─────────────────────────────────────────────────────────────────────────────
// ResponseInterpreter
// ─────────────────────────────────────────────────────────────────────────────

/// Drives one backend round trip and turns the text into an
/// [`Interpretation`].
pub struct ResponseInterpreter {
    backend: Arc<dyn LanguageBackend>,
    generation: GenerationConfig,
    schema: String,
}

impl ResponseInterpreter {
    pub fn new(backend: Arc<dyn LanguageBackend>, generation: GenerationConfig) -> Self {
        let schema = serde_json::to_string_pretty(&schema_for!(StructuredReply))
            .unwrap_or_default();
        Self {
            backend,
            generation,
            schema,
        }
    }

    pub fn backend(&self) -> &Arc<dyn LanguageBackend> {
        &self.backend
    }

    /// Render the full prompt for `utterance`.
    pub fn build_prompt(&self, utterance: &str, turn: &TurnContext<'_>) -> String {
        let mut prompt = String::from(
            "You are Hearth, a helpful smart home assistant. You control lights, switches, \
             fans, media players, climate devices and covers.\n\n\
             Available actions:\n\
             - turn_on / turn_off: lights, switches, fans, media players, climate\n\
             - set_brightness: lights, parameter \"brightness\" (0-255)\n\
             - set_color_temp: lights, parameter \"color_temp\" in kelvin (2700-6500)\n\
             - set_temperature: climate, parameter \"temperature\" in °C (10-40, comfortable 16-28)\n\
             - set_humidity: climate, parameter \"humidity\" in percent (0-100)\n\
             - open / close: covers such as blinds, curtains and garage doors\n\
             When you know which device is meant, add its id as parameter \"entity_id\".\n",
        );

        if !turn.devices.is_empty() {
            prompt.push_str("\nKnown devices:\n");
            for device in turn.devices.iter().take(MAX_PROMPT_DEVICES) {
                let _ = writeln!(
                    prompt,
                    "- {} ({}, {}): {}",
                    device.id, device.name, device.device_type, device.state
                );
            }
        }

        if !turn.context.referenced_devices.is_empty() {
            let _ = writeln!(
                prompt,
                "\nPreviously referenced devices: {}",
                turn.context.referenced_devices.join(", ")
            );
        }
        if let Some(last) = &turn.context.last_action {
            let _ = writeln!(prompt, "Last action: {}", last.action);
        }

        let start = turn.history.len().saturating_sub(HISTORY_WINDOW);
        let window = &turn.history[start..];
        if !window.is_empty() {
            prompt.push_str("\nRecent conversation history:\n");
            for message in window {
                let speaker = match message.role {
                    Role::Assistant => "Hearth",
                    _ => "User",
                };
                let _ = writeln!(prompt, "{speaker}: {}", message.content);
            }
        }

        let _ = write!(
            prompt,
            "\nRespond with valid JSON only, no additional text, matching this schema:\n{}\n\
             Example:\n\
             {{\"understanding\": \"turn on the kitchen light\", \"response\": \"Turning on the kitchen light.\", \
             \"actions\": [{{\"action\": \"turn_on\", \"parameters\": {{\"entity_id\": \"light.kitchen\"}}}}], \
             \"confidence\": 0.95}}\n\n\
             {USER_REQUEST_MARKER} {}\n",
            self.schema,
            utterance.trim()
        );
        prompt
    }

    /// Prompt the backend about `utterance` and interpret its answer.
    ///
    /// # Errors
    ///
    /// Returns [`HearthError::NotConnected`] when the backend is not loaded.
    /// Every other failure degrades to [`rule_based`].
    pub async fn interpret(
        &self,
        utterance: &str,
        turn: &TurnContext<'_>,
    ) -> Result<Interpretation, HearthError> {
        if !self.backend.is_loaded() {
            return Err(HearthError::NotConnected);
        }
        let prompt = self.build_prompt(utterance, turn);
        match self.backend.generate(&prompt, &self.generation).await {
            Ok(text) => Ok(interpret_text(&text)),
            Err(e) => {
                warn!(error = %e, "generation failed; answering from keyword rules");
                Ok(rule_based(utterance))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline stages
// ─────────────────────────────────────────────────────────────────────────────

/// Interpret raw backend text: structured parse first, keyword scan second.
pub fn interpret_text(text: &str) -> Interpretation {
    if let Some(reply) = extract_candidate(text).and_then(parse_structured) {
        return Interpretation {
            understanding: reply.understanding,
            reply: reply.response,
            actions: reply.actions,
            confidence: reply.confidence,
            source: InterpretationSource::Structured,
        };
    }
    debug!(len = text.len(), "reply is not structured; scanning for keywords");
    Interpretation {
        understanding: None,
        reply: text.trim().to_string(),
        actions: keyword_fallback(text).into_iter().collect(),
        confidence: None,
        source: InterpretationSource::KeywordFallback,
    }
}

/// The JSON-looking part of `text`: the body of the first fenced block (a
/// language tag after the opening fence is skipped), else the span from the
/// first `{` to the last `}`.
pub fn extract_candidate(text: &str) -> Option<&str> {
    if let Some(open) = text.find("```") {
        let after = &text[open + 3..];
        // Skip a language tag such as `json`.
        let body = match after.find('\n') {
            Some(nl) if !after[..nl].trim_start().starts_with('{') => &after[nl + 1..],
            _ => after,
        };
        let inner = body.find("```").map_or(body, |close| &body[..close]);
        let inner = inner.trim();
        if !inner.is_empty() {
            return Some(inner);
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Parse `candidate` as a [`StructuredReply`]; `None` when malformed or
/// missing a required field.
pub fn parse_structured(candidate: &str) -> Option<StructuredReply> {
    match serde_json::from_str(candidate) {
        Ok(reply) => Some(reply),
        Err(e) => {
            debug!(error = %e, "structured parse failed");
            None
        }
    }
}

struct KeywordRule {
    verbs: &'static [&'static str],
    nouns: &'static [&'static str],
    build: fn() -> DeviceAction,
    reply: &'static str,
}

const LIGHT_NOUNS: &[&str] = &["light", "lamp"];
const TOGGLE_NOUNS: &[&str] = &["light", "lamp", "switch", "fan"];
const CLIMATE_NOUNS: &[&str] = &["temperature", "thermostat", "heating"];
const COVER_NOUNS: &[&str] = &["blind", "curtain", "garage", "cover", "shade"];

/// First match wins; "turn on" phrasing outranks everything else.
static KEYWORD_RULES: &[KeywordRule] = &[
    KeywordRule {
        verbs: &["turn on", "turning on", "turned on", "switch on", "switching on"],
        nouns: TOGGLE_NOUNS,
        build: || DeviceAction::new("turn_on"),
        reply: "I'll turn that on for you.",
    },
    KeywordRule {
        verbs: &["turn off", "turning off", "turned off", "switch off", "switching off"],
        nouns: TOGGLE_NOUNS,
        build: || DeviceAction::new("turn_off"),
        reply: "I'll turn that off for you.",
    },
    KeywordRule {
        verbs: &["dim"],
        nouns: LIGHT_NOUNS,
        build: || DeviceAction::new("set_brightness").with_param("brightness", DEFAULT_BRIGHTNESS),
        reply: "I'll dim the lights for you.",
    },
    KeywordRule {
        verbs: &["set", "change", "adjust", "make"],
        nouns: CLIMATE_NOUNS,
        build: || DeviceAction::new("set_temperature").with_param("temperature", DEFAULT_TEMPERATURE),
        reply: "I'll set the temperature to 22°C.",
    },
    KeywordRule {
        verbs: &["close", "closing", "shut"],
        nouns: COVER_NOUNS,
        build: || DeviceAction::new("close"),
        reply: "I'll close that for you.",
    },
    KeywordRule {
        verbs: &["open"],
        nouns: COVER_NOUNS,
        build: || DeviceAction::new("open"),
        reply: "I'll open that for you.",
    },
];

fn matching_rule(text: &str) -> Option<&'static KeywordRule> {
    let text = text.to_lowercase();
    KEYWORD_RULES.iter().find(|rule| {
        rule.verbs.iter().any(|v| text.contains(v)) && rule.nouns.iter().any(|n| text.contains(n))
    })
}

/// Best-guess single action from free text, with fixed default parameters.
pub fn keyword_fallback(text: &str) -> Option<DeviceAction> {
    matching_rule(text).map(|rule| (rule.build)())
}

/// Answer `utterance` without a model.
pub fn rule_based(utterance: &str) -> Interpretation {
    let (reply, actions) = match matching_rule(utterance) {
        Some(rule) => (rule.reply.to_string(), vec![(rule.build)()]),
        None => {
            let lower = utterance.to_lowercase();
            let reply = if ["status", "what", "which"].iter().any(|w| lower.contains(w)) {
                STATUS_REPLY
            } else {
                UNCLEAR_REPLY
            };
            (reply.to_string(), Vec::new())
        }
    };
    Interpretation {
        understanding: None,
        reply,
        actions,
        confidence: None,
        source: InterpretationSource::RuleBased,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::local::LocalBackend;
    use async_trait::async_trait;
    use crate::backend::ModelInfo;

    const PAYLOAD: &str = r#"{"understanding":"lights on","response":"Turning on the bedroom light.","actions":[{"action":"turn_on","parameters":{"entity_id":"light.bedroom"}}],"confidence":0.9}"#;

    struct FailingBackend;

    #[async_trait]
    impl LanguageBackend for FailingBackend {
        async fn load(&self) -> Result<(), BackendError> {
            Ok(())
        }
        async fn unload(&self) {}
        fn is_loaded(&self) -> bool {
            true
        }
        async fn generate(&self, _: &str, _: &GenerationConfig) -> Result<String, BackendError> {
            Err(BackendError::Upstream("overloaded".into()))
        }
        fn describe_model(&self) -> ModelInfo {
            ModelInfo {
                name: "failing".into(),
                backend: "test".into(),
                loaded: true,
                endpoint: None,
            }
        }
    }

    fn empty_turn<'a>(context: &'a Context) -> TurnContext<'a> {
        TurnContext {
            history: &[],
            context,
            devices: &[],
        }
    }

    // ── extract / parse ──────────────────────────────────────────────────────

    #[test]
    fn fenced_and_bare_payloads_parse_identically() {
        let bare = interpret_text(PAYLOAD);
        let tagged = interpret_text(&format!("Sure!\n```json\n{PAYLOAD}\n```\nDone."));
        let untagged = interpret_text(&format!("```\n{PAYLOAD}\n```"));
        assert_eq!(bare.source, InterpretationSource::Structured);
        assert_eq!(bare.actions, tagged.actions);
        assert_eq!(bare.actions, untagged.actions);
        assert_eq!(tagged.reply, "Turning on the bedroom light.");
    }

    #[test]
    fn json_embedded_in_prose_is_sliced_out() {
        let text = format!("Here you go: {PAYLOAD} hope that helps");
        assert_eq!(extract_candidate(&text), Some(PAYLOAD));
        assert_eq!(interpret_text(&text).source, InterpretationSource::Structured);
    }

    #[test]
    fn missing_required_field_falls_back() {
        let text = r#"{"understanding":"turn on the light","confidence":0.4}"#;
        let result = interpret_text(text);
        assert_eq!(result.source, InterpretationSource::KeywordFallback);
        assert_eq!(result.actions.len(), 1);
        assert_eq!(result.actions[0].action, "turn_on");
    }

    #[test]
    fn null_parameters_are_accepted() {
        let text = r#"{"response":"ok","actions":[{"action":"turn_off","parameters":null}]}"#;
        let result = interpret_text(text);
        assert_eq!(result.source, InterpretationSource::Structured);
        assert!(result.actions[0].parameters.is_empty());
        assert_eq!(result.confidence, None);
    }

    // ── keyword fallback ─────────────────────────────────────────────────────

    #[test]
    fn prose_with_turn_on_and_light_yields_one_turn_on() {
        let result = interpret_text("Okay, I will turn on the light in the kitchen.");
        assert_eq!(result.actions.len(), 1);
        assert_eq!(result.actions[0].action, "turn_on");
        assert_eq!(result.reply, "Okay, I will turn on the light in the kitchen.");
    }

    #[test]
    fn turn_on_outranks_other_phrasing_in_the_same_text() {
        let result = interpret_text("I turned off the hallway earlier; now I'll turn on the light.");
        let names: Vec<&str> = result.actions.iter().map(|a| a.action.as_str()).collect();
        assert_eq!(names, ["turn_on"]);

        let dimmed = keyword_fallback("The light was dim, so I'll turn on the lamp.").unwrap();
        assert_eq!(dimmed.action, "turn_on");
    }

    #[test]
    fn keyword_defaults_are_fixed() {
        let dim = keyword_fallback("Please dim the lamp").unwrap();
        assert_eq!(dim.number_param("brightness"), Some(128.0));
        let heat = keyword_fallback("Can you set the thermostat warmer").unwrap();
        assert_eq!(heat.number_param("temperature"), Some(22.0));
        assert_eq!(keyword_fallback("shut the garage").unwrap().action, "close");
        assert_eq!(keyword_fallback("open the blinds").unwrap().action, "open");
    }

    #[test]
    fn unmatched_prose_passes_through_without_actions() {
        let result = interpret_text("  The weather is lovely today.  ");
        assert!(result.actions.is_empty());
        assert_eq!(result.reply, "The weather is lovely today.");
    }

    #[test]
    fn rule_based_replies() {
        let off = rule_based("turn off all the lights");
        assert_eq!(off.actions[0].action, "turn_off");
        assert_eq!(off.source, InterpretationSource::RuleBased);
        assert_eq!(rule_based("what is the status?").reply, STATUS_REPLY);
        assert_eq!(rule_based("sing me a song").reply, UNCLEAR_REPLY);
    }

    // ── prompt ───────────────────────────────────────────────────────────────

    #[test]
    fn prompt_carries_bounded_history_and_context() {
        let interpreter =
            ResponseInterpreter::new(Arc::new(LocalBackend::new()), GenerationConfig::default());
        let history: Vec<Message> = (0..14)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("question {i}"))
                } else {
                    Message::assistant(format!("answer {i}"))
                }
            })
            .collect();
        let context = Context {
            referenced_devices: vec!["light.bedroom".into()],
            last_action: Some(DeviceAction::new("turn_on")),
            ..Default::default()
        };
        let turn = TurnContext {
            history: &history,
            context: &context,
            devices: &[],
        };
        let prompt = interpreter.build_prompt("turn it off", &turn);

        assert!(!prompt.contains("question 2\n"));
        assert!(prompt.contains("User: question 4"));
        assert!(prompt.contains("Hearth: answer 13"));
        assert!(prompt.contains("Previously referenced devices: light.bedroom"));
        assert!(prompt.contains("Last action: turn_on"));
        assert!(prompt.contains("\"actions\""));
        assert!(prompt.trim_end().ends_with("User request: turn it off"));
    }

    #[test]
    fn prompt_without_history_has_no_history_section() {
        let interpreter =
            ResponseInterpreter::new(Arc::new(LocalBackend::new()), GenerationConfig::default());
        let context = Context::default();
        let prompt = interpreter.build_prompt("hello", &empty_turn(&context));
        assert!(!prompt.contains("Recent conversation history"));
        assert!(!prompt.contains("Previously referenced devices"));
    }

    // ── interpret ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn unloaded_backend_is_not_connected() {
        let interpreter =
            ResponseInterpreter::new(Arc::new(LocalBackend::new()), GenerationConfig::default());
        let context = Context::default();
        let err = interpreter
            .interpret("turn on the light", &empty_turn(&context))
            .await
            .unwrap_err();
        assert_eq!(err, HearthError::NotConnected);
    }

    #[tokio::test]
    async fn local_backend_round_trip_is_structured() {
        let backend = Arc::new(LocalBackend::new());
        backend.load().await.unwrap();
        let interpreter = ResponseInterpreter::new(backend, GenerationConfig::default());
        let context = Context::default();
        let result = interpreter
            .interpret("turn on the bedroom lights", &empty_turn(&context))
            .await
            .unwrap();
        assert_eq!(result.source, InterpretationSource::Structured);
        assert_eq!(result.actions, vec![DeviceAction::new("turn_on")]);
    }

    #[tokio::test]
    async fn generation_failure_degrades_to_rule_based() {
        let interpreter =
            ResponseInterpreter::new(Arc::new(FailingBackend), GenerationConfig::default());
        let context = Context::default();
        let result = interpreter
            .interpret("please dim the living room lights", &empty_turn(&context))
            .await
            .unwrap();
        assert_eq!(result.source, InterpretationSource::RuleBased);
        assert_eq!(result.actions[0].action, "set_brightness");
    }
}
