//! End-to-end turns through `HomeService` against a simulated home.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use hearth_hal::{DeviceRegistry, SimGateway};
use hearth_kernel::SafetyValidator;
use hearth_memory::{ConversationStore, SqliteConversationRepository};
use hearth_runtime::{
    ActionStatus, BackendError, ChatRequest, GenerationConfig, HomeService, LanguageBackend,
    ModelInfo,
};
use hearth_types::{HearthError, Role};
use parking_lot::Mutex;

// ─────────────────────────────────────────────────────────────────────────────
// Scripted backend
// ─────────────────────────────────────────────────────────────────────────────

/// Replays canned generations in order and records every prompt.
struct ScriptedBackend {
    loaded: AtomicBool,
    replies: Mutex<VecDeque<Result<String, BackendError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new(replies: Vec<Result<&str, BackendError>>) -> Arc<Self> {
        Arc::new(Self {
            loaded: AtomicBool::new(true),
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(str::to_string))
                    .collect(),
            ),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn unloaded() -> Arc<Self> {
        let backend = Self::new(vec![]);
        backend.loaded.store(false, Ordering::SeqCst);
        backend
    }
}

#[async_trait]
impl LanguageBackend for ScriptedBackend {
    async fn load(&self) -> Result<(), BackendError> {
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unload(&self) {
        self.loaded.store(false, Ordering::SeqCst);
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn generate(&self, prompt: &str, _: &GenerationConfig) -> Result<String, BackendError> {
        self.prompts.lock().push(prompt.to_string());
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(r#"{"response":"Okay.","actions":[]}"#.to_string()))
    }

    fn describe_model(&self) -> ModelInfo {
        ModelInfo {
            name: "scripted".into(),
            backend: "test".into(),
            loaded: self.is_loaded(),
            endpoint: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

fn home() -> Arc<SimGateway> {
    Arc::new(
        SimGateway::builder()
            .with_device("light.bedroom", "Bedroom Light")
            .with_device("light.kitchen", "Kitchen Light")
            .with_device("climate.hall", "Hall Thermostat")
            .with_device("cover.garage", "Garage Door")
            .build(),
    )
}

fn service_with(
    gateway: &Arc<SimGateway>,
    backend: Arc<ScriptedBackend>,
    store: Arc<ConversationStore>,
) -> HomeService {
    let registry = Arc::new(DeviceRegistry::new(gateway.clone(), SafetyValidator::new()));
    HomeService::new(store, registry, backend, GenerationConfig::default())
}

fn service(gateway: &Arc<SimGateway>, backend: Arc<ScriptedBackend>) -> HomeService {
    service_with(gateway, backend, Arc::new(ConversationStore::new()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn bedroom_lights_turn_on_once() {
    let gw = home();
    let backend = ScriptedBackend::new(vec![Ok(
        r#"{"understanding":"turn on bedroom lights","response":"Turning on the bedroom lights.","actions":[{"action":"turn_on","parameters":{}}],"confidence":0.92}"#,
    )]);
    let svc = service(&gw, backend);

    let response = svc
        .handle_message(ChatRequest::new("turn on the bedroom lights"))
        .await
        .unwrap();

    let calls = gw.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!((calls[0].domain.as_str(), calls[0].service.as_str()), ("light", "turn_on"));
    assert_eq!(calls[0].target_id, "light.bedroom");
    assert_eq!(response.reply, "Turning on the bedroom lights.");
    assert_eq!(response.confidence, Some(0.92));
    assert_eq!(response.model, "scripted");
    assert_eq!(gw.device("light.bedroom").unwrap().state, "on");
}

#[tokio::test]
async fn out_of_range_brightness_makes_no_calls() {
    let gw = home();
    let backend = ScriptedBackend::new(vec![Ok(
        r#"{"response":"Setting brightness to 300.","actions":[{"action":"set_brightness","parameters":{"brightness":300}}]}"#,
    )]);
    let svc = service(&gw, backend);

    let response = svc
        .handle_message(ChatRequest::new("set brightness to 300"))
        .await
        .unwrap();

    assert!(gw.calls().is_empty());
    assert_eq!(response.outcomes.len(), 1);
    assert!(matches!(
        response.outcomes[0].status,
        ActionStatus::Rejected { ref reason } if reason.contains("255")
    ));
    assert!(response.reply.contains("255"));
}

#[tokio::test]
async fn fenced_reply_with_entity_id_targets_that_device() {
    let gw = home();
    let backend = ScriptedBackend::new(vec![Ok(
        "Sure thing!\n```json\n{\"response\":\"Dimming the kitchen.\",\"actions\":[{\"action\":\"set_brightness\",\"parameters\":{\"brightness\":64.6,\"entity_id\":\"light.kitchen\"}}]}\n```",
    )]);
    let svc = service(&gw, backend);

    svc.handle_message(ChatRequest::new("dim it a lot")).await.unwrap();

    let calls = gw.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].target_id, "light.kitchen");
    assert!(!calls[0].params.contains_key("entity_id"));
    assert_eq!(calls[0].params["brightness"], 64);
}

#[tokio::test]
async fn unloaded_backend_answers_from_rules() {
    let gw = home();
    let svc = service(&gw, ScriptedBackend::unloaded());

    let response = svc
        .handle_message(ChatRequest::new("turn off all the lights"))
        .await
        .unwrap();

    let mut targets: Vec<String> = gw.calls().into_iter().map(|c| c.target_id).collect();
    targets.sort();
    assert_eq!(targets, ["light.bedroom", "light.kitchen"]);
    assert_eq!(response.executed().count(), 2);
    assert!(response.reply.contains("turn that off"));
}

#[tokio::test]
async fn generation_failure_answers_from_rules() {
    let gw = home();
    let backend = ScriptedBackend::new(vec![Err(BackendError::Timeout(
        std::time::Duration::from_secs(30),
    ))]);
    let svc = service(&gw, backend);

    let response = svc
        .handle_message(ChatRequest::new("please open the garage"))
        .await
        .unwrap();

    assert_eq!(gw.calls()[0].service, "open_cover");
    assert_eq!(gw.device("cover.garage").unwrap().state, "open");
    assert!(!response.reply.is_empty());
}

#[tokio::test]
async fn follow_up_pronoun_uses_referenced_device() {
    let gw = home();
    let backend = ScriptedBackend::new(vec![
        Ok(r#"{"response":"Kitchen light on.","actions":[{"action":"turn_on","parameters":{}}]}"#),
        Ok(r#"{"response":"Turning it off.","actions":[{"action":"turn_off","parameters":{}}]}"#),
    ]);
    let svc = service(&gw, backend.clone());

    let first = svc
        .handle_message(ChatRequest::new("turn on the kitchen light"))
        .await
        .unwrap();
    svc.handle_message(ChatRequest::new("now turn it off").in_conversation(first.conversation_id))
        .await
        .unwrap();

    let calls = gw.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].target_id, "light.kitchen");
    assert_eq!(calls[1].service, "turn_off");

    let prompts = backend.prompts.lock();
    assert!(prompts[1].contains("Previously referenced devices: light.kitchen"));
    assert!(prompts[1].contains("User: turn on the kitchen light"));
    assert!(prompts[1].contains("Hearth: Kitchen light on."));
}

#[tokio::test]
async fn turn_is_recorded_with_metadata() {
    let gw = home();
    let backend = ScriptedBackend::new(vec![Ok(
        r#"{"response":"Warming up.","actions":[{"action":"set_temperature","parameters":{"temperature":30}}],"confidence":0.7}"#,
    )]);
    let svc = service(&gw, backend);

    let response = svc
        .handle_message(ChatRequest::new("make the hall warmer"))
        .await
        .unwrap();
    let conversation = svc.conversation(response.conversation_id).unwrap();

    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.messages[0].role, Role::User);
    let assistant = &conversation.messages[1];
    assert_eq!(assistant.role, Role::Assistant);
    assert_eq!(assistant.metadata.devices_referenced, ["climate.hall"]);
    assert_eq!(assistant.metadata.model_used.as_deref(), Some("scripted"));
    assert_eq!(assistant.metadata.confidence, Some(0.7));
    assert_eq!(
        conversation.context.last_action.as_ref().map(|a| a.action.as_str()),
        Some("set_temperature")
    );
    // 30°C is allowed but outside the comfort band.
    assert!(response.reply.contains("warm"));
}

#[tokio::test]
async fn unknown_conversation_is_not_found() {
    let gw = home();
    let svc = service(&gw, ScriptedBackend::new(vec![]));
    let err = svc
        .handle_message(ChatRequest::new("hello").in_conversation(uuid::Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(matches!(err, HearthError::NotFound { .. }));
}

#[tokio::test]
async fn blank_message_is_rejected() {
    let gw = home();
    let svc = service(&gw, ScriptedBackend::new(vec![]));
    assert!(matches!(
        svc.handle_message(ChatRequest::new("   ")).await,
        Err(HearthError::Validation(_))
    ));
}

#[tokio::test]
async fn turns_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hearth.db");
    let path = path.to_str().unwrap();
    let gw = home();

    let conversation_id = {
        let repo = Arc::new(SqliteConversationRepository::open(path).unwrap());
        let svc = service_with(
            &gw,
            ScriptedBackend::new(vec![]),
            Arc::new(ConversationStore::with_repository(repo)),
        );
        svc.handle_message(ChatRequest::new("hello there"))
            .await
            .unwrap()
            .conversation_id
    };

    let repo = Arc::new(SqliteConversationRepository::open(path).unwrap());
    let svc = service_with(
        &gw,
        ScriptedBackend::new(vec![]),
        Arc::new(ConversationStore::with_repository(repo)),
    );
    let restored = svc.conversation(conversation_id).unwrap();
    assert_eq!(restored.messages.len(), 2);
    assert_eq!(restored.messages[0].content, "hello there");
}

#[tokio::test]
async fn health_reports_components() {
    let gw = home();
    let svc = service(&gw, ScriptedBackend::new(vec![]));
    svc.refresh_devices().await.unwrap();

    let report = svc.health().await;
    assert!(report.backend_loaded);
    assert!(report.gateway_reachable);
    assert_eq!(report.cached_devices, 4);

    gw.set_offline(true);
    assert!(!svc.health().await.gateway_reachable);
}
