//! REPL – Read-Eval-Print Loop for the Shepherd operator console.
//!
//! Supported slash-commands:
//!   /help                             – show this list
//!   /stats                            – violation statistics and latest violations
//!   /breakers                         – circuit breaker state per agent
//!   /violations <agent> [n]           – recent in-memory violations for an agent
//!   /history <agent> [n]              – persisted violations from the SQLite store
//!   /validate <agent> <action> <json> – run an action through the guardrails
//!   /kill                             – emergency kill switch (suspend every agent)
//!   /reset <agent>                    – close an agent's circuit breaker
//!   /settings                         – edit `~/.shepherd/config.toml`
//!   /quit | /exit                     – flush persistence and exit

use colored::Colorize;
use serde_json::Value;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use shepherd_kernel::GuardrailEngine;
use shepherd_memory::SqliteGuardrailStore;
use shepherd_types::{AgentAction, AgentType, GuardrailViolation, UserProfile};

use crate::config::{self, Config};

const DEFAULT_LIST_LEN: usize = 10;

/// Everything a command handler needs.
pub struct Console {
    pub engine: Arc<GuardrailEngine>,
    pub runtime: tokio::runtime::Handle,
    pub database_path: String,
}

/// A parsed slash-command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Stats,
    Breakers,
    Violations { agent: AgentType, limit: usize },
    History { agent: AgentType, limit: usize },
    Validate { agent: AgentType, action: AgentAction },
    Kill,
    Reset { agent: AgentType },
    Settings,
    Quit,
}

/// Parse one input line.  The error is a message for the operator.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    match head {
        "/help" => Ok(Command::Help),
        "/stats" => Ok(Command::Stats),
        "/breakers" => Ok(Command::Breakers),
        "/kill" => Ok(Command::Kill),
        "/settings" => Ok(Command::Settings),
        "/quit" | "/exit" => Ok(Command::Quit),
        "/violations" | "/history" => {
            let mut args = rest.split_whitespace();
            let agent = parse_agent(args.next())?;
            let limit = match args.next() {
                Some(n) => n
                    .parse::<usize>()
                    .map_err(|_| format!("'{n}' is not a valid count"))?,
                None => DEFAULT_LIST_LEN,
            };
            if head == "/violations" {
                Ok(Command::Violations { agent, limit })
            } else {
                Ok(Command::History { agent, limit })
            }
        }
        "/reset" => Ok(Command::Reset {
            agent: parse_agent(rest.split_whitespace().next())?,
        }),
        "/validate" => {
            let mut parts = rest.splitn(3, char::is_whitespace);
            let agent = parse_agent(parts.next())?;
            let action_type = parts
                .next()
                .filter(|s| !s.is_empty())
                .ok_or("usage: /validate <agent> <action> <json>")?;
            let payload = match parts.next().map(str::trim) {
                Some(raw) if !raw.is_empty() => serde_json::from_str::<Value>(raw)
                    .map_err(|e| format!("payload is not valid JSON: {e}"))?,
                _ => Value::Object(Default::default()),
            };
            Ok(Command::Validate {
                agent,
                action: AgentAction::new(action_type, payload),
            })
        }
        other => Err(format!("Unknown command: '{other}'")),
    }
}

fn parse_agent(raw: Option<&str>) -> Result<AgentType, String> {
    let raw = raw.filter(|s| !s.is_empty()).ok_or_else(|| {
        format!(
            "missing agent (one of: {})",
            AgentType::ALL.map(|a| a.as_str()).join(", ")
        )
    })?;
    raw.parse::<AgentType>().map_err(|e| e.to_string())
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(shutdown: Arc<AtomicBool>, console: &Console) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "shepherd>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Ok(Command::Help) => cmd_help(),
            Ok(Command::Stats) => cmd_stats(console),
            Ok(Command::Breakers) => cmd_breakers(console),
            Ok(Command::Violations { agent, limit }) => cmd_violations(console, agent, limit),
            Ok(Command::History { agent, limit }) => cmd_history(console, agent, limit),
            Ok(Command::Validate { agent, action }) => cmd_validate(console, agent, &action),
            Ok(Command::Kill) => cmd_kill(console),
            Ok(Command::Reset { agent }) => cmd_reset(console, agent),
            Ok(Command::Settings) => cmd_settings(),
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Err(msg) => {
                println!(
                    "{} Type {} for available commands.",
                    msg.red(),
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
    println!("{}", "Shepherd Commands".bold().underline());
    println!("  {}                            – violation statistics", "/stats".bold().cyan());
    println!("  {}                         – circuit breaker per agent", "/breakers".bold().cyan());
    println!("  {}        – recent violations (in memory)", "/violations <agent> [n]".bold().cyan());
    println!("  {}           – persisted violations (SQLite)", "/history <agent> [n]".bold().cyan());
    println!("  {} – run an action through the guardrails", "/validate <agent> <action> <json>".bold().cyan());
    println!("  {}                             – suspend every agent", "/kill".bold().cyan());
    println!("  {}                    – close an agent's breaker", "/reset <agent>".bold().cyan());
    println!("  {}                         – edit ~/.shepherd/config.toml", "/settings".bold().cyan());
    println!("  {}                      – flush and exit", "/quit  /exit".bold().cyan());
    println!();
    println!(
        "  Agents: {}",
        AgentType::ALL.map(|a| a.as_str()).join(", ").dimmed()
    );
    println!();
}

fn cmd_stats(console: &Console) {
    let dashboard = console.engine.dashboard(5);
    let stats = &dashboard.stats;

    println!("{}", "Violation Statistics".bold().underline());
    println!("  Total violations : {}", stats.total_violations.to_string().yellow());
    println!("  Violation rate   : {}", format!("{:.4}", stats.violation_rate).yellow());
    println!("  Audited actions  : {}", console.engine.audit_log_count());
    if !stats.by_agent.is_empty() {
        println!("  By agent:");
        for (agent, n) in &stats.by_agent {
            println!("    {:<18} {}", agent.as_str(), n);
        }
    }
    if !stats.by_severity.is_empty() {
        println!("  By severity:");
        for (severity, n) in &stats.by_severity {
            println!("    {:<18} {}", severity.as_str(), n);
        }
    }
    let open = dashboard
        .circuit_breakers
        .values()
        .filter(|b| b.is_open)
        .count();
    println!("  Open breakers    : {}", open);
    if !dashboard.recent_violations.is_empty() {
        println!("  Latest violations:");
        print_violations(&dashboard.recent_violations);
    }
}

fn cmd_breakers(console: &Console) {
    println!("{}", "Circuit Breakers".bold().underline());
    for (agent, state) in console.engine.circuit_breakers() {
        let status = if state.is_open {
            "OPEN".red().bold()
        } else {
            "closed".green()
        };
        let since = state
            .opened_at
            .map(|t| format!(" since {}", t.format("%Y-%m-%d %H:%M:%S UTC")))
            .unwrap_or_default();
        println!(
            "  {:<18} {:<8} failures={}{}",
            agent.as_str(),
            status,
            state.failure_count,
            since.dimmed()
        );
    }
}

fn cmd_violations(console: &Console, agent: AgentType, limit: usize) {
    let violations = console.engine.recent_violations(agent, limit);
    println!(
        "{} {}",
        "Recent violations for".bold().underline(),
        agent.as_str().bold()
    );
    if violations.is_empty() {
        println!("  {}", "none".dimmed());
    } else {
        print_violations(&violations);
    }
}

fn cmd_history(console: &Console, agent: AgentType, limit: usize) {
    let store = match SqliteGuardrailStore::open_existing(&console.database_path) {
        Ok(store) => store,
        Err(e) => {
            println!("{}: {}", "Cannot open guardrail database".red(), e);
            return;
        }
    };
    let total = store.violation_count();
    match store.violations_for(agent, limit) {
        Ok(violations) => {
            println!(
                "{} {} ({} stored in total)",
                "Persisted violations for".bold().underline(),
                agent.as_str().bold(),
                total.map(|n| n.to_string()).unwrap_or_else(|_| "?".into())
            );
            if violations.is_empty() {
                println!("  {}", "none".dimmed());
            } else {
                print_violations(&violations);
            }
        }
        Err(e) => println!("{}: {}", "History query failed".red(), e),
    }
}

fn cmd_validate(console: &Console, agent: AgentType, action: &AgentAction) {
    let user = UserProfile::new("operator-console");
    let outcome = console
        .runtime
        .block_on(console.engine.validate_agent_action(agent, action, &user));

    match outcome {
        Ok(result) if result.approved => {
            println!("  {} {}", "✓".green().bold(), "APPROVED".green().bold());
            for warning in result.warnings.iter().flatten() {
                println!("    {} {}", "warning:".yellow(), warning);
            }
            if let Some(modified) = &result.modified {
                println!("    {} {}", "modified payload:".yellow(), modified);
            }
        }
        Ok(result) => {
            println!(
                "  {} {}: {}",
                "✗".red().bold(),
                "REJECTED".red().bold(),
                result.reason.unwrap_or_default()
            );
            for warning in result.warnings.iter().flatten() {
                println!("    {} {}", "warning:".yellow(), warning);
            }
        }
        Err(e) => {
            println!(
                "  {} {} [{}]: {}",
                "⚠".red().bold(),
                "ERROR".red().bold(),
                e.severity().as_str(),
                e
            );
        }
    }
}

fn cmd_kill(console: &Console) {
    let answer = prompt_str(
        &format!("  {} Suspend ALL agents? [y/N]: ", "⚠".red().bold()),
        "n",
    );
    if answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes") {
        console.engine.emergency_kill_switch();
        println!("  {}", "Kill switch engaged: every agent is suspended.".red().bold());
    } else {
        println!("  Aborted.");
    }
}

fn cmd_reset(console: &Console, agent: AgentType) {
    match console.engine.reset_circuit_breaker(agent) {
        Ok(()) => println!("  {} breaker for {} closed", "✓".green(), agent.as_str().bold()),
        Err(e) => println!("  {}: {}", "Reset failed".red(), e),
    }
}

fn cmd_settings() {
    let mut cfg = match config::load() {
        Ok(Some(c)) => c,
        Ok(None) => Config::default(),
        Err(e) => {
            println!("{}: {}", "Error loading config".red(), e);
            return;
        }
    };

    println!("{}", "Settings Editor".bold().underline());
    println!("  (press Enter to keep the current value; changes apply on restart)");

    cfg.database_path = prompt_str(
        &format!("  Database path        [{}]: ", cfg.database_path),
        &cfg.database_path,
    );
    let g = &mut cfg.guardrail;
    g.violation_rate_threshold = prompt_parse(
        &format!("  Violation threshold  [{}]: ", g.violation_rate_threshold),
        g.violation_rate_threshold,
    );
    g.rate_window = prompt_parse(&format!("  Rate window          [{}]: ", g.rate_window), g.rate_window);
    g.cooldown_secs = prompt_parse(
        &format!("  Cool-down (seconds)  [{}]: ", g.cooldown_secs),
        g.cooldown_secs,
    );
    g.audit_rejections = prompt_parse(
        &format!("  Audit rejections     [{}]: ", g.audit_rejections),
        g.audit_rejections,
    );

    if let Err(e) = cfg.guardrail.validate() {
        println!("{}: {}", "Settings not saved".red(), e);
        return;
    }
    match config::save(&cfg) {
        Ok(()) => println!(
            "{} {}",
            "✓ Settings saved to".green(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn print_violations(violations: &[GuardrailViolation]) {
    for v in violations {
        println!(
            "    {} {:<8} {:<16} {:<14} {}",
            v.timestamp.format("%H:%M:%S").to_string().dimmed(),
            v.severity.as_str(),
            v.check_name,
            v.action_type,
            v.reason
        );
    }
}

/// Prompt for a parseable value.  Returns `default` when the user presses
/// Enter or types something invalid.
pub(crate) fn prompt_parse<T>(msg: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    let raw = prompt_str(msg, &default.to_string());
    match raw.parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            println!(
                "  {} '{}' is not a valid value, keeping {}",
                "Warning:".yellow(),
                raw,
                default
            );
            default
        }
    }
}

/// Prompt for a string value.  Returns `default` when the user presses Enter.
pub(crate) fn prompt_str(msg: &str, default: &str) -> String {
    print!("{}", msg);
    io::stdout().flush().ok();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() {
                default.to_string()
            } else {
                trimmed
            }
        }
        Err(_) => default.to_string(),
    }
}
