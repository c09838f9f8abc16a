//! `hearth-cli` – Hearth Command Line Interface
//!
//! The `hearth` binary:
//!
//! 1. Initialises structured logging.
//! 2. Loads `~/.hearth/config.toml`, writing defaults on first run.
//! 3. Wires the pipeline: gateway (Home Assistant, or a simulated home when
//!    no token is configured), device registry, conversation store (SQLite
//!    when a database path is set) and language backend (Ollama, falling back
//!    to the offline local backend when the model cannot be loaded).
//! 4. Drops the user into an interactive REPL.  Ctrl-C / Ctrl-D exit.

mod config;
mod repl;

use colored::Colorize;
use std::io::Write;
use std::sync::Arc;
use tracing::warn;

use hearth_hal::{DeviceRegistry, Gateway, HomeAssistantGateway, SimGateway};
use hearth_kernel::SafetyValidator;
use hearth_memory::{ConversationStore, SqliteConversationRepository};
use hearth_runtime::{HomeService, LanguageBackend, LocalBackend, OllamaBackend};

use crate::config::{BackendKind, Config};

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG selects the filter (default "info"); HEARTH_LOG_FORMAT=json
    // switches to newline-delimited JSON.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("HEARTH_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => first_run(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };

    // ── Wiring ────────────────────────────────────────────────────────────
    let service = match runtime.block_on(build_service(&cfg)) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("{}: {}", "Startup failed".red(), e);
            std::process::exit(1);
        }
    };

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(&runtime, &service, &cfg);
}

// ─────────────────────────────────────────────────────────────────────────────
// Wiring
// ─────────────────────────────────────────────────────────────────────────────

async fn build_service(cfg: &Config) -> Result<HomeService, String> {
    let gateway = build_gateway(cfg)?;
    let registry = Arc::new(DeviceRegistry::new(gateway, SafetyValidator::new()));

    step("Loading devices");
    match registry.refresh().await {
        Ok(count) => println!("{} ({count} device(s))", "OK".green()),
        Err(e) => {
            println!("{}", "unavailable".yellow());
            println!("    {}", e.to_string().dimmed());
        }
    }

    let store = Arc::new(build_store(cfg));
    let backend = build_backend(cfg).await?;

    Ok(HomeService::new(store, registry, backend, cfg.llm.generation()))
}

fn build_gateway(cfg: &Config) -> Result<Arc<dyn Gateway>, String> {
    let ha = &cfg.home_assistant;
    if ha.token.is_empty() {
        warn!("no Home Assistant token configured; using a simulated home");
        println!(
            "  {} No Home Assistant token set – running against a {}.",
            "!".yellow().bold(),
            "simulated home".bold()
        );
        return Ok(Arc::new(demo_home()));
    }
    let gateway = HomeAssistantGateway::new(
        &ha.url,
        ha.token.expose(),
        std::time::Duration::from_secs(ha.timeout_secs),
    )
    .map_err(|e| format!("Failed to create Home Assistant client: {e}"))?;
    println!("  Home Assistant at {}", ha.url.bold());
    Ok(Arc::new(gateway))
}

fn demo_home() -> SimGateway {
    SimGateway::builder()
        .with_device("light.living_room", "Living Room Light")
        .with_device("light.bedroom", "Bedroom Light")
        .with_device("light.kitchen", "Kitchen Light")
        .with_device("switch.coffee_maker", "Coffee Maker")
        .with_device("fan.bedroom", "Bedroom Fan")
        .with_device("climate.thermostat", "Thermostat")
        .with_device("cover.garage_door", "Garage Door")
        .with_device("media_player.living_room", "Living Room Speaker")
        .with_device("sensor.outdoor_temperature", "Outdoor Temperature")
        .build()
}

fn build_store(cfg: &Config) -> ConversationStore {
    let Some(path) = cfg.storage.database_path.as_deref() else {
        return ConversationStore::new();
    };
    step(&format!("Opening conversation database {}", path.dimmed()));
    match SqliteConversationRepository::open(path) {
        Ok(repo) => {
            let store = ConversationStore::with_repository(Arc::new(repo));
            println!("{} ({} conversation(s))", "OK".green(), store.stats().conversations);
            store
        }
        Err(e) => {
            println!("{}", "FAILED".red());
            warn!(path, error = %e, "conversation database unavailable; history will not persist");
            ConversationStore::new()
        }
    }
}

async fn build_backend(cfg: &Config) -> Result<Arc<dyn LanguageBackend>, String> {
    if cfg.llm.backend == BackendKind::Ollama {
        step(&format!(
            "Loading {} from Ollama at {}",
            cfg.llm.model.bold(),
            cfg.llm.ollama_url.dimmed()
        ));
        let ollama = OllamaBackend::new(&cfg.llm.ollama_url, &cfg.llm.model, cfg.llm.timeout());
        match ollama.load().await {
            Ok(()) => {
                println!("{}", "online".green());
                return Ok(Arc::new(ollama));
            }
            Err(e) => {
                println!("{}", "offline".yellow());
                println!("    {}", e.to_string().dimmed());
                println!(
                    "    Run `{}` and `{}` to use a real model.",
                    "ollama serve".bold(),
                    format!("ollama pull {}", cfg.llm.model).bold()
                );
                warn!(error = %e, "falling back to the local backend");
            }
        }
    }

    step("Starting local backend");
    let local = LocalBackend::new();
    local
        .load()
        .await
        .map_err(|e| format!("Failed to start local backend: {e}"))?;
    println!("{}", "OK".green());
    Ok(Arc::new(local))
}

// ─────────────────────────────────────────────────────────────────────────────
// First run
// ─────────────────────────────────────────────────────────────────────────────

fn first_run() -> Config {
    let defaults = Config::default();
    match config::save(&defaults) {
        Ok(()) => println!(
            "  {} Default config written to {}",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    println!(
        "  Set {} (or {}) to control a real Home Assistant.",
        "home_assistant.token".bold(),
        "HEARTH_HA_TOKEN".bold()
    );
    let mut cfg = defaults;
    config::apply_env_overrides(&mut cfg);
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"    __  __                __  __  "#.bold().yellow());
    println!("{}", r#"   / / / /__  ____ ______/ /_/ /_ "#.bold().yellow());
    println!("{}", r#"  / /_/ / _ \/ __ `/ ___/ __/ __ \"#.bold().yellow());
    println!("{}", r#" / __  /  __/ /_/ / /  / /_/ / / /"#.bold().yellow());
    println!("{}", r#"/_/ /_/\___/\__,_/_/   \__/_/ /_/ "#.bold().yellow());
    println!();
    println!(
        "  {} {}",
        "Hearth".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Natural-language home automation");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Print a startup step label, leaving the cursor on the line for its status.
fn step(label: &str) {
    print!("  {} … ", label);
    std::io::stdout().flush().ok();
}
