//! [`HomeService`] – the message-to-device-action pipeline.
//!
//! Each call to [`HomeService::handle_message`] runs one turn:
//!
//! 1. **Recall** – fetch (or start) the conversation, read the last
//!    [`HISTORY_WINDOW`] messages and the working [`Context`], append the
//!    user message.
//! 2. **Interpret** – prompt the backend through the
//!    [`ResponseInterpreter`].  An unloaded backend is answered from the
//!    keyword rules instead.
//! 3. **Gatekeep** – every action is checked by the
//!    [`SafetyValidator`][hearth_kernel::SafetyValidator] before any target
//!    is chosen.  A rejected action never reaches a device and the reply
//!    names the violated constraint.
//! 4. **Resolve** – pick target devices (see below).
//! 5. **Act** – dispatch each `(action, device)` through the
//!    [`DeviceRegistry`].
//! 6. **Remember** – update the context, append the assistant message with
//!    its metadata, persist.
//!
//! # Target resolution
//!
//! | Order | Rule |
//! |---|---|
//! | 1 | explicit `entity_id` / `device_id` parameter (stripped before dispatch) |
//! | 2 | devices whose name or id words appear in the message and whose type supports the action; highest score wins, ties all dispatched |
//! | 3 | the most recently referenced device that supports the action |
//! | 4 | the only device that supports the action |
//! | – | otherwise the action is reported as unresolved |
//!
//! The service holds no lock of its own.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hearth_hal::{DeviceRegistry, service_map};
use hearth_memory::{ConversationStore, StoreStats};
use hearth_types::{
    Context, Conversation, Device, DeviceAction, HearthError, Message, MessageMetadata,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{GenerationConfig, LanguageBackend, ModelInfo};
use crate::interpreter::{HISTORY_WINDOW, ResponseInterpreter, TurnContext, rule_based};

/// Most recent device ids kept in [`Context::referenced_devices`].
pub const MAX_REFERENCED_DEVICES: usize = 20;

/// Parameter keys that name a target rather than configure the action.
const TARGET_KEYS: [&str; 2] = ["entity_id", "device_id"];

// ─────────────────────────────────────────────────────────────────────────────
// Request / response types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Continue this conversation; `None` starts a new one.
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conversation_id: None,
        }
    }

    pub fn in_conversation(mut self, id: Uuid) -> Self {
        self.conversation_id = Some(id);
        self
    }
}

/// What happened to one requested action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionStatus {
    Executed {
        domain: String,
        service: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        warning: Option<String>,
    },
    /// Blocked by the safety validator.
    Rejected { reason: String },
    /// The device type has no service for this action.
    Unsupported { reason: String },
    /// No target device could be determined.
    Unresolved,
    /// The gateway call failed.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionOutcome {
    pub action: DeviceAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(flatten)]
    pub status: ActionStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub conversation_id: Uuid,
    pub reply: String,
    pub outcomes: Vec<ActionOutcome>,
    pub processing_time_ms: u64,
    pub model: String,
    pub confidence: Option<f64>,
}

impl ChatResponse {
    /// Outcomes that reached a device.
    pub fn executed(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, ActionStatus::Executed { .. }))
    }
}

/// Snapshot reported by [`HomeService::health`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub backend_loaded: bool,
    pub model: ModelInfo,
    pub gateway_reachable: bool,
    pub store: StoreStats,
    pub cached_devices: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// HomeService
// ─────────────────────────────────────────────────────────────────────────────

/// Orchestrates store, interpreter and registry for each incoming message.
pub struct HomeService {
    store: Arc<ConversationStore>,
    registry: Arc<DeviceRegistry>,
    backend: Arc<dyn LanguageBackend>,
    interpreter: ResponseInterpreter,
}

impl HomeService {
    pub fn new(
        store: Arc<ConversationStore>,
        registry: Arc<DeviceRegistry>,
        backend: Arc<dyn LanguageBackend>,
        generation: GenerationConfig,
    ) -> Self {
        let interpreter = ResponseInterpreter::new(Arc::clone(&backend), generation);
        Self {
            store,
            registry,
            backend,
            interpreter,
        }
    }

    /// Run one conversational turn.
    ///
    /// # Errors
    ///
    /// - [`HearthError::Validation`] – the message is blank.
    /// - [`HearthError::NotFound`] – `conversation_id` names an unknown
    ///   conversation.
    ///
    /// Backend and device failures never fail the turn; they are reported in
    /// the reply and in [`ChatResponse::outcomes`].
    pub async fn handle_message(&self, request: ChatRequest) -> Result<ChatResponse, HearthError> {
        let started = Instant::now();
        let utterance = request.message.trim();
        if utterance.is_empty() {
            return Err(HearthError::Validation("message cannot be empty".into()));
        }

        // ── Recall ───────────────────────────────────────────────────────────
        let conversation = match request.conversation_id {
            Some(id) => self.store.get(id)?,
            None => self.store.create(),
        };
        let id = conversation.id;
        let history = self.store.recent_messages(id, HISTORY_WINDOW)?;
        let mut context = conversation.context;
        self.store.add_message(id, Message::user(utterance))?;

        let devices = match self.registry.devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "device inventory unavailable; using cached snapshot");
                self.registry.snapshot()
            }
        };

        // ── Interpret ────────────────────────────────────────────────────────
        let turn = TurnContext {
            history: &history,
            context: &context,
            devices: &devices,
        };
        let interpretation = self
            .interpreter
            .interpret(utterance, &turn)
            .await
            .unwrap_or_else(|e| {
                debug!(error = %e, "backend unavailable; answering from keyword rules");
                rule_based(utterance)
            });
        debug!(
            conversation_id = %id,
            source = ?interpretation.source,
            actions = interpretation.actions.len(),
            "message interpreted"
        );

        // ── Gatekeep, resolve, act ───────────────────────────────────────────
        let mut outcomes = Vec::new();
        let mut notes: Vec<String> = Vec::new();
        let mut touched: Vec<String> = Vec::new();
        let mut performed: Vec<DeviceAction> = Vec::new();

        for requested in &interpretation.actions {
            let (action, explicit) = split_target(requested);

            let verdict = self.registry.validator().validate_action(&action);
            if let Some(reason) = verdict.error() {
                warn!(action = %action.action, reason, "action rejected by safety validator");
                push_note(&mut notes, format!("I couldn't {}: {reason}.", describe(&action)));
                outcomes.push(ActionOutcome {
                    action,
                    device_id: None,
                    status: ActionStatus::Rejected {
                        reason: reason.to_string(),
                    },
                });
                continue;
            }

            let targets = resolve_targets(&action, explicit, utterance, &devices, &context);
            if targets.is_empty() {
                push_note(
                    &mut notes,
                    format!("I couldn't tell which device to {}.", describe(&action)),
                );
                outcomes.push(ActionOutcome {
                    action,
                    device_id: None,
                    status: ActionStatus::Unresolved,
                });
                continue;
            }

            for device_id in targets {
                let status = match self.registry.execute(&device_id, &action).await {
                    Ok(receipt) => {
                        if let Some(w) = &receipt.warning {
                            push_note(&mut notes, format!("Note: {w}."));
                        }
                        if !touched.contains(&device_id) {
                            touched.push(device_id.clone());
                        }
                        performed.push(action.clone());
                        ActionStatus::Executed {
                            domain: receipt.domain,
                            service: receipt.service,
                            warning: receipt.warning,
                        }
                    }
                    Err(HearthError::Validation(reason)) => {
                        push_note(&mut notes, format!("I couldn't {}: {reason}.", describe(&action)));
                        ActionStatus::Rejected { reason }
                    }
                    Err(e @ HearthError::UnsupportedAction { .. }) => {
                        ActionStatus::Unsupported { reason: e.to_string() }
                    }
                    Err(e) => {
                        warn!(device_id = %device_id, error = %e, "action failed");
                        push_note(&mut notes, format!("I couldn't reach {device_id}."));
                        ActionStatus::Failed { reason: e.to_string() }
                    }
                };
                outcomes.push(ActionOutcome {
                    action: action.clone(),
                    device_id: Some(device_id),
                    status,
                });
            }
        }

        // ── Remember ─────────────────────────────────────────────────────────
        remember_devices(&mut context, &touched);
        if let Some(last) = performed.last() {
            context.last_action = Some(last.clone());
        }
        self.store.update_context(id, context)?;

        let mut reply = interpretation.reply;
        for note in &notes {
            if !reply.is_empty() {
                reply.push(' ');
            }
            reply.push_str(note);
        }

        let model = self.backend.describe_model().name;
        let processing_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let metadata = MessageMetadata {
            devices_referenced: touched,
            actions_performed: performed,
            processing_time_ms: Some(processing_time_ms),
            model_used: Some(model.clone()),
            confidence: interpretation.confidence,
        };
        self.store
            .add_message(id, Message::assistant(reply.clone()).with_metadata(metadata))?;
        self.store.touch(id)?;

        info!(
            conversation_id = %id,
            executed = outcomes
                .iter()
                .filter(|o| matches!(o.status, ActionStatus::Executed { .. }))
                .count(),
            requested = outcomes.len(),
            processing_time_ms,
            "turn complete"
        );
        Ok(ChatResponse {
            conversation_id: id,
            reply,
            outcomes,
            processing_time_ms,
            model,
            confidence: interpretation.confidence,
        })
    }

    // -------------------------------------------------------------------------
    // Conversations
    // -------------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns [`HearthError::NotFound`] for an unknown id.
    pub fn conversation(&self, id: Uuid) -> Result<Conversation, HearthError> {
        self.store.get(id)
    }

    /// # Errors
    ///
    /// Returns [`HearthError::NotFound`] for an unknown id.
    pub fn delete_conversation(&self, id: Uuid) -> Result<(), HearthError> {
        self.store.delete(id)
    }

    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// Drop conversations idle for longer than `max_age`.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let removed = self.store.cleanup(max_age);
        if removed > 0 {
            info!(removed, "expired conversations removed");
        }
        removed
    }

    // -------------------------------------------------------------------------
    // Devices & health
    // -------------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns the refresh failure when no cached data exists.
    pub async fn devices(&self) -> Result<Vec<Device>, HearthError> {
        self.registry.devices().await
    }

    /// Force a device cache refresh.
    ///
    /// # Errors
    ///
    /// Returns the gateway failure.
    pub async fn refresh_devices(&self) -> Result<usize, HearthError> {
        self.registry.refresh().await
    }

    pub fn model(&self) -> ModelInfo {
        self.backend.describe_model()
    }

    pub async fn health(&self) -> HealthReport {
        let model = self.backend.describe_model();
        HealthReport {
            backend_loaded: model.loaded,
            model,
            gateway_reachable: self.registry.test_connection().await,
            store: self.store.stats(),
            cached_devices: self.registry.snapshot().len(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn push_note(notes: &mut Vec<String>, note: String) {
    if !notes.contains(&note) {
        notes.push(note);
    }
}

/// `"set_brightness"` → `"set brightness"`.
fn describe(action: &DeviceAction) -> String {
    action.action.replace('_', " ")
}

/// Separate target parameters from the action.  A target may be one id or
/// an array of ids; each id is kept once, in first-seen order.
fn split_target(requested: &DeviceAction) -> (DeviceAction, Vec<String>) {
    let mut action = requested.clone();
    let mut ids: Vec<String> = Vec::new();
    for key in TARGET_KEYS {
        match action.parameters.remove(key) {
            Some(Value::String(id)) => ids.push(id),
            Some(Value::Array(values)) => ids.extend(
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string),
            ),
            _ => {}
        }
    }
    let mut seen = HashSet::new();
    let explicit = ids
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect();
    (action, explicit)
}

/// Lowercased words of `text`, plural `s` dropped, short words skipped.
fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(|w| {
            let w = w.to_lowercase();
            match w.strip_suffix('s') {
                Some(stem) if w.len() > 3 => stem.to_string(),
                _ => w,
            }
        })
        .collect()
}

fn resolve_targets(
    action: &DeviceAction,
    explicit: Vec<String>,
    utterance: &str,
    devices: &[Device],
    context: &Context,
) -> Vec<String> {
    if !explicit.is_empty() {
        return explicit;
    }

    let capable: Vec<&Device> = devices
        .iter()
        .filter(|d| service_map::supports(d.device_type, &action.action))
        .collect();

    let spoken = words(utterance);
    let mut best = 0;
    let mut winners: Vec<String> = Vec::new();
    for device in &capable {
        let mut vocabulary = words(&device.name);
        vocabulary.extend(words(&device.id));
        let score = vocabulary.intersection(&spoken).count();
        if score == 0 || score < best {
            continue;
        }
        if score > best {
            best = score;
            winners.clear();
        }
        winners.push(device.id.clone());
    }
    if !winners.is_empty() {
        return winners;
    }

    if let Some(id) = context
        .referenced_devices
        .iter()
        .rev()
        .find(|id| capable.iter().any(|d| &d.id == *id))
    {
        return vec![id.clone()];
    }

    match capable.as_slice() {
        [only] => vec![only.id.clone()],
        _ => Vec::new(),
    }
}

/// Move `touched` ids to the most-recent end and cap the list.
fn remember_devices(context: &mut Context, touched: &[String]) {
    for id in touched {
        context.referenced_devices.retain(|d| d != id);
        context.referenced_devices.push(id.clone());
    }
    let overflow = context
        .referenced_devices
        .len()
        .saturating_sub(MAX_REFERENCED_DEVICES);
    context.referenced_devices.drain(..overflow);
}
