//! REPL – Read-Eval-Print Loop for the Hearth interactive shell.
//!
//! Plain lines are sent to the assistant within the current conversation.
//! Supported slash-commands:
//!   /help         – show this list
//!   /devices      – list known devices
//!   /refresh      – reload devices from the gateway
//!   /stats        – conversation and message counts
//!   /health       – backend, gateway and store status
//!   /new          – start a new conversation
//!   /cleanup      – drop expired conversations
//!   /quit | /exit – exit the CLI (Ctrl-C / Ctrl-D work too)

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::runtime::Runtime;
use uuid::Uuid;

use hearth_runtime::{ActionStatus, ChatRequest, ChatResponse, HomeService};
use hearth_types::HearthError;

use crate::config::Config;

/// A parsed line of input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Devices,
    Refresh,
    Stats,
    Health,
    New,
    Cleanup,
    Quit,
    Chat(String),
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if !line.starts_with('/') {
            return Some(Command::Chat(line.to_string()));
        }
        let cmd = match line.split_whitespace().next().unwrap_or(line) {
            "/help" | "/?" => Command::Help,
            "/devices" => Command::Devices,
            "/refresh" => Command::Refresh,
            "/stats" => Command::Stats,
            "/health" => Command::Health,
            "/new" => Command::New,
            "/cleanup" => Command::Cleanup,
            "/quit" | "/exit" => Command::Quit,
            other => Command::Unknown(other.to_string()),
        };
        Some(cmd)
    }
}

/// Entry point for the interactive REPL.  Returns when the user quits.
pub fn run(runtime: &Runtime, service: &HomeService, cfg: &Config) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Failed to initialise line editor".red(), e);
            return;
        }
    };
    let prompt = format!("{} ", "hearth>".bold().yellow());
    let mut conversation: Option<Uuid> = None;

    loop {
        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => {
                println!("{}", "Goodbye.".green());
                break;
            }
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };

        let Some(command) = Command::parse(&line) else {
            continue;
        };
        let _ = editor.add_history_entry(line.trim());

        match command {
            Command::Chat(message) => cmd_chat(runtime, service, &mut conversation, message),
            Command::Help => cmd_help(),
            Command::Devices => cmd_devices(runtime, service),
            Command::Refresh => cmd_refresh(runtime, service),
            Command::Stats => cmd_stats(service, conversation),
            Command::Health => cmd_health(runtime, service),
            Command::New => {
                conversation = None;
                println!("{}", "Started a new conversation.".green());
            }
            Command::Cleanup => cmd_cleanup(service, cfg, &mut conversation),
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                break;
            }
            Command::Unknown(other) => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Hearth Commands".bold().underline());
    println!("  Just type to talk to Hearth, e.g. {}", "turn on the kitchen light".italic());
    println!("  {}   – list known devices", "/devices".bold().cyan());
    println!("  {}   – reload devices from the gateway", "/refresh".bold().cyan());
    println!("  {}     – conversation statistics", "/stats".bold().cyan());
    println!("  {}    – component status", "/health".bold().cyan());
    println!("  {}       – start a new conversation", "/new".bold().cyan());
    println!("  {}   – remove expired conversations", "/cleanup".bold().cyan());
    println!("  {}  – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_chat(runtime: &Runtime, service: &HomeService, conversation: &mut Option<Uuid>, message: String) {
    let request = ChatRequest {
        message,
        conversation_id: *conversation,
    };
    match runtime.block_on(service.handle_message(request)) {
        Ok(response) => {
            *conversation = Some(response.conversation_id);
            print_response(&response);
        }
        Err(e @ HearthError::NotFound { .. }) => {
            *conversation = None;
            println!("{}: {} – starting a new conversation.", "Error".red(), e);
        }
        Err(e) => println!("{}: {}", "Error".red(), e),
    }
}

fn print_response(response: &ChatResponse) {
    println!("{} {}", "hearth:".bold().green(), response.reply);
    for outcome in &response.outcomes {
        let target = outcome.device_id.as_deref().unwrap_or("?");
        let line = match &outcome.status {
            ActionStatus::Executed { domain, service, .. } => {
                format!("{} {}.{} → {}", "✓".green(), domain, service, target)
            }
            ActionStatus::Rejected { reason } => {
                format!("{} {} rejected: {}", "✗".red(), outcome.action.action, reason)
            }
            ActionStatus::Unsupported { reason } => format!("{} {}", "✗".red(), reason),
            ActionStatus::Unresolved => {
                format!("{} {}: no matching device", "?".yellow(), outcome.action.action)
            }
            ActionStatus::Failed { reason } => format!("{} {} → {}: {}", "✗".red(), outcome.action.action, target, reason),
        };
        println!("    {}", line.dimmed());
    }
    println!(
        "    {}",
        format!("{} · {} ms", response.model, response.processing_time_ms).dimmed()
    );
}

fn cmd_devices(runtime: &Runtime, service: &HomeService) {
    match runtime.block_on(service.devices()) {
        Ok(devices) if devices.is_empty() => println!("{}", "No devices found.".yellow()),
        Ok(devices) => {
            println!("{}", "Devices".bold().underline());
            for d in &devices {
                let state = if d.state == "on" || d.state == "open" {
                    d.state.green()
                } else {
                    d.state.normal()
                };
                println!(
                    "  {} {:<28} {} {}",
                    format!("{:<32}", d.id).bold(),
                    d.name,
                    format!("{:<13}", d.device_type).dimmed(),
                    state
                );
            }
        }
        Err(e) => println!("{}: {}", "Failed to list devices".red(), e),
    }
}

fn cmd_refresh(runtime: &Runtime, service: &HomeService) {
    match runtime.block_on(service.refresh_devices()) {
        Ok(count) => println!("{} {} device(s) loaded.", "✓".green(), count),
        Err(e) => println!("{}: {}", "Refresh failed".red(), e),
    }
}

fn cmd_stats(service: &HomeService, conversation: Option<Uuid>) {
    let stats = service.stats();
    println!("{}", "Statistics".bold().underline());
    println!("  Conversations : {}", stats.conversations.to_string().yellow());
    println!("  Messages      : {}", stats.messages.to_string().yellow());
    match conversation.and_then(|id| service.conversation(id).ok()) {
        Some(conv) => println!(
            "  Current       : {} ({} message(s))",
            conv.id.to_string().dimmed(),
            conv.messages.len()
        ),
        None => println!("  Current       : {}", "none".dimmed()),
    }
}

fn cmd_health(runtime: &Runtime, service: &HomeService) {
    let report = runtime.block_on(service.health());
    let status = |ok: bool| if ok { "ok".green() } else { "down".red() };
    println!("{}", "Health".bold().underline());
    println!(
        "  Backend  : {} ({} via {})",
        status(report.backend_loaded),
        report.model.name.bold(),
        report.model.backend
    );
    println!("  Gateway  : {}", status(report.gateway_reachable));
    println!(
        "  Store    : {} conversation(s), {} message(s)",
        report.store.conversations, report.store.messages
    );
    println!("  Devices  : {} cached", report.cached_devices);
    if let Ok(json) = serde_json::to_string(&report) {
        tracing::debug!(report = %json, "health report");
    }
}

fn cmd_cleanup(service: &HomeService, cfg: &Config, conversation: &mut Option<Uuid>) {
    let removed = service.cleanup(cfg.conversation_max_age());
    println!(
        "{} Removed {} conversation(s) idle for more than {} hour(s).",
        "✓".green(),
        removed,
        cfg.conversation_max_age_hours
    );
    if let Some(id) = *conversation
        && service.conversation(id).is_err()
    {
        *conversation = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(Command::parse("   "), None);
    }

    #[test]
    fn plain_text_is_chat() {
        assert_eq!(
            Command::parse("  turn on the lights "),
            Some(Command::Chat("turn on the lights".into()))
        );
    }

    #[test]
    fn slash_commands_parse() {
        assert_eq!(Command::parse("/devices"), Some(Command::Devices));
        assert_eq!(Command::parse("/exit"), Some(Command::Quit));
        assert_eq!(Command::parse("/new please"), Some(Command::New));
        assert_eq!(
            Command::parse("/dance"),
            Some(Command::Unknown("/dance".into()))
        );
    }
}
