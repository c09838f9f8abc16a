//! Configuration Vault – reads/writes `~/.hearth/config.toml`.
//!
//! ```toml
//! conversation_max_age_hours = 24
//!
//! [home_assistant]
//! url = "http://homeassistant.local:8123"
//! token = "…"
//! timeout_secs = 30
//!
//! [llm]
//! backend = "ollama"
//! ollama_url = "http://localhost:11434"
//! model = "llama3.2"
//!
//! [storage]
//! database_path = "/home/me/.hearth/hearth.db"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

use hearth_runtime::GenerationConfig;

/// A credential that is wiped from memory on drop and never printed.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.0.is_empty() { "<not set>" } else { "<redacted>" })
    }
}

/// Which language backend to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Ollama,
    Local,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Ollama => write!(f, "ollama"),
            BackendKind::Local => write!(f, "local"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(BackendKind::Ollama),
            "local" => Ok(BackendKind::Local),
            other => Err(format!("unknown backend '{other}' (expected ollama or local)")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeAssistantConfig {
    #[serde(default = "default_ha_url")]
    pub url: String,

    /// Long-lived access token.  Without one the CLI runs against a
    /// simulated home.
    #[serde(default, skip_serializing_if = "Secret::is_empty")]
    pub token: Secret,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_top_k")]
    pub top_k: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file for conversations.  Absent = in-memory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
}

/// Persisted user configuration stored in `~/.hearth/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Conversations idle for longer than this are removed by `/cleanup`.
    #[serde(default = "default_max_age_hours")]
    pub conversation_max_age_hours: u64,

    #[serde(default)]
    pub home_assistant: HomeAssistantConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_ha_url() -> String {
    "http://homeassistant.local:8123".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "llama3.2".to_string()
}
fn default_max_tokens() -> u32 {
    512
}
fn default_temperature() -> f32 {
    0.7
}
fn default_top_p() -> f32 {
    0.9
}
fn default_top_k() -> u32 {
    40
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_age_hours() -> u64 {
    24
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            url: default_ha_url(),
            token: Secret::default(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            ollama_url: default_ollama_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            conversation_max_age_hours: default_max_age_hours(),
            home_assistant: HomeAssistantConfig::default(),
            llm: LlmConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl LlmConfig {
    pub fn generation(&self) -> GenerationConfig {
        GenerationConfig {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            ..GenerationConfig::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    pub fn conversation_max_age(&self) -> Duration {
        Duration::from_secs(self.conversation_max_age_hours.saturating_mul(3600))
    }
}

/// Return the path to `~/.hearth/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".hearth").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `HEARTH_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `HEARTH_HA_URL` | `home_assistant.url` |
/// | `HEARTH_HA_TOKEN` | `home_assistant.token` |
/// | `HEARTH_OLLAMA_URL` | `llm.ollama_url` |
/// | `HEARTH_MODEL` | `llm.model` |
/// | `HEARTH_LLM_TIMEOUT` | `llm.timeout_secs` |
/// | `HEARTH_BACKEND` | `llm.backend` |
/// | `HEARTH_DB_PATH` | `storage.database_path` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("HEARTH_HA_URL") {
        cfg.home_assistant.url = v;
    }
    if let Ok(v) = std::env::var("HEARTH_HA_TOKEN") {
        cfg.home_assistant.token = Secret::new(v);
    }
    if let Ok(v) = std::env::var("HEARTH_OLLAMA_URL") {
        cfg.llm.ollama_url = v;
    }
    if let Ok(v) = std::env::var("HEARTH_MODEL") {
        cfg.llm.model = v;
    }
    if let Ok(v) = std::env::var("HEARTH_LLM_TIMEOUT")
        && let Ok(secs) = v.parse::<u64>()
    {
        cfg.llm.timeout_secs = secs;
    }
    if let Ok(v) = std::env::var("HEARTH_BACKEND")
        && let Ok(kind) = v.parse::<BackendKind>()
    {
        cfg.llm.backend = kind;
    }
    if let Ok(v) = std::env::var("HEARTH_DB_PATH") {
        cfg.storage.database_path = Some(v).filter(|p| !p.is_empty());
    }
}

/// Save the config to disk, creating `~/.hearth/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // The token lives in this file: owner read/write only (rw-------).
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_debug_redacts_token() {
        let mut cfg = Config::default();
        cfg.home_assistant.token = Secret::new("eyJhbGciOiJIUzI1NiJ9.secret");
        let debug_str = format!("{:?}", cfg);
        assert!(!debug_str.contains("eyJhbGciOiJIUzI1NiJ9"), "token must not appear in debug output");
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn config_debug_shows_not_set_for_empty_token() {
        let debug_str = format!("{:?}", Config::default());
        assert!(debug_str.contains("<not set>"));
    }

    #[test]
    fn secret_zeroize_clears_value() {
        let mut secret = Secret::new("hunter2");
        secret.zeroize();
        assert!(secret.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.home_assistant.token = Secret::new("abc123");
        cfg.storage.database_path = Some("/tmp/hearth.db".into());
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.conversation_max_age_hours, 24);
        assert_eq!(loaded.llm.model, "llama3.2");
        assert_eq!(loaded.llm.backend, BackendKind::Ollama);
        assert_eq!(loaded.home_assistant.token.expose(), "abc123");
        assert_eq!(loaded.storage.database_path.as_deref(), Some("/tmp/hearth.db"));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[llm]\nbackend = \"local\"\n").unwrap();

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.llm.backend, BackendKind::Local);
        assert_eq!(loaded.llm.top_k, 40);
        assert_eq!(loaded.home_assistant.timeout_secs, 30);
        assert!(loaded.storage.database_path.is_none());
    }

    #[test]
    fn generation_config_follows_llm_section() {
        let mut llm = LlmConfig::default();
        llm.max_tokens = 128;
        let generation = llm.generation();
        assert_eq!(generation.max_tokens, 128);
        assert_eq!(generation.stop_sequences, GenerationConfig::default().stop_sequences);
    }

    #[test]
    fn config_path_points_to_hearth_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".hearth"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn apply_env_overrides_changes_ollama_url() {
        // SAFETY: each test uses its own variable; no other thread reads it.
        unsafe { std::env::set_var("HEARTH_OLLAMA_URL", "http://gpu-box:11434") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.llm.ollama_url, "http://gpu-box:11434");
        unsafe { std::env::remove_var("HEARTH_OLLAMA_URL") };
    }

    #[test]
    fn apply_env_overrides_changes_token() {
        // SAFETY: each test uses its own variable; no other thread reads it.
        unsafe { std::env::set_var("HEARTH_HA_TOKEN", "from-env") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.home_assistant.token.expose(), "from-env");
        unsafe { std::env::remove_var("HEARTH_HA_TOKEN") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_timeout() {
        // SAFETY: each test uses its own variable; no other thread reads it.
        unsafe { std::env::set_var("HEARTH_LLM_TIMEOUT", "soon") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.llm.timeout_secs, 30);
        unsafe { std::env::remove_var("HEARTH_LLM_TIMEOUT") };
    }

    #[test]
    fn apply_env_overrides_changes_backend() {
        // SAFETY: each test uses its own variable; no other thread reads it.
        unsafe { std::env::set_var("HEARTH_BACKEND", "Local") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.llm.backend, BackendKind::Local);
        unsafe { std::env::remove_var("HEARTH_BACKEND") };
    }

    #[test]
    fn apply_env_overrides_sets_db_path() {
        // SAFETY: each test uses its own variable; no other thread reads it.
        unsafe { std::env::set_var("HEARTH_DB_PATH", "/var/lib/hearth.db") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.storage.database_path.as_deref(), Some("/var/lib/hearth.db"));
        unsafe { std::env::remove_var("HEARTH_DB_PATH") };
    }
}
