use std::collections::HashMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Heterogeneous parameter bag carried by a [`DeviceAction`].
pub type Parameters = serde_json::Map<String, Value>;

// ─────────────────────────────────────────────────────────────────────────────
// Devices
// ─────────────────────────────────────────────────────────────────────────────

/// Kinds of device the assistant knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Light,
    Switch,
    Sensor,
    Climate,
    Cover,
    Fan,
    MediaPlayer,
}

impl DeviceType {
    /// Map a gateway entity domain (the part of `light.kitchen` before the
    /// dot) to a device type.  Unknown domains are treated as sensors.
    pub fn from_domain(domain: &str) -> Self {
        match domain {
            "light" => DeviceType::Light,
            "switch" => DeviceType::Switch,
            "climate" => DeviceType::Climate,
            "cover" => DeviceType::Cover,
            "fan" => DeviceType::Fan,
            "media_player" => DeviceType::MediaPlayer,
            _ => DeviceType::Sensor,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Light => "light",
            DeviceType::Switch => "switch",
            DeviceType::Sensor => "sensor",
            DeviceType::Climate => "climate",
            DeviceType::Cover => "cover",
            DeviceType::Fan => "fan",
            DeviceType::MediaPlayer => "media_player",
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Local mirror of one gateway entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Gateway entity id, e.g. `"light.bedroom"`.
    pub id: String,
    /// Human-friendly display name.
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    /// Raw state string as reported by the gateway (`"on"`, `"21.5"`, ...).
    pub state: String,
    #[serde(default)]
    pub attributes: serde_json::Map<String, Value>,
    pub domain: String,
    pub last_updated: DateTime<Utc>,
}

/// A named operation requested against a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DeviceAction {
    /// Action name, e.g. `"turn_on"` or `"set_brightness"`.
    pub action: String,
    /// Action parameters.  `null` and a missing key both decode as empty.
    #[serde(default, deserialize_with = "null_as_empty")]
    #[schemars(with = "Parameters")]
    pub parameters: Parameters,
}

impl DeviceAction {
    /// An action with no parameters.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            parameters: Parameters::new(),
        }
    }

    /// Builder-style parameter insertion.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Read a numeric parameter.  Returns `None` when the key is absent or
    /// the value is not a JSON number.
    pub fn number_param(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(Value::as_f64)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Parameters, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Parameters>::deserialize(deserializer)?.unwrap_or_default())
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversations
// ─────────────────────────────────────────────────────────────────────────────

/// Author of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Parse the persisted lowercase form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// Optional bookkeeping attached to a [`Message`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices_referenced: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions_performed: Vec<DeviceAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// One turn in a [`Conversation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl Message {
    /// Construct a message stamped with a fresh id and the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: MessageMetadata::default(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Per-conversation working memory used to resolve follow-up requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Device ids mentioned or acted on, oldest first.
    #[serde(default)]
    pub referenced_devices: Vec<String>,
    #[serde(default)]
    pub last_action: Option<DeviceAction>,
    #[serde(default)]
    pub user_preferences: HashMap<String, String>,
    #[serde(default)]
    pub session_data: HashMap<String, Value>,
}

/// A dialogue between the user and the assistant.
///
/// Messages are kept in non-decreasing timestamp order and
/// `updated_at >= created_at` always holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub context: Context,
}

impl Conversation {
    /// An empty conversation with a fresh id and context.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            context: Context::default(),
        }
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Global error type shared by every Hearth crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HearthError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Language backend is not loaded")]
    NotLoaded,

    #[error("Language backend is not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Model {model} unavailable: {reason}")]
    ModelUnavailable { model: String, reason: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Action '{action}' is not supported for {device_type} devices")]
    UnsupportedAction { action: String, device_type: String },

    #[error("Failed to call {domain}.{service} on {target}: {reason}")]
    Execution {
        domain: String,
        service: String,
        target: String,
        reason: String,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl HearthError {
    /// Shorthand for [`HearthError::NotFound`].
    pub fn not_found(kind: &str, id: impl ToString) -> Self {
        HearthError::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }
}
