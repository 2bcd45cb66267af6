//! `shepherd-cli` – Guardrail operator console
//!
//! This binary hosts a [`GuardrailEngine`] for local operation.  It:
//!
//! 1. Checks for `~/.shepherd/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 2. Opens the SQLite guardrail database and starts the persistence writer.
//! 3. Builds the engine and registers the demonstration checks.
//! 4. Drops the operator into an **interactive REPL** with slash-commands
//!    (`/stats`, `/breakers`, `/validate`, `/kill`, `/reset`, `/help`, ...).
//! 5. Intercepts **Ctrl-C** to stop the REPL and flush pending records.

mod config;
mod demo_checks;
mod repl;
mod telemetry;

use colored::Colorize;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use shepherd_kernel::{GuardrailEngine, GuardrailStore, PersistenceWriter};
use shepherd_memory::SqliteGuardrailStore;

fn main() {
    let _telemetry = telemetry::init_tracing("shepherd");

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – initiating graceful shutdown …".yellow().bold());
        println!("{}", "  Press Enter to flush pending records and exit.".yellow());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = run_first_run_wizard();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("shepherd-worker")
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {}", "Failed to start async runtime".red(), e);
            return;
        }
    };

    // ── Durable store ─────────────────────────────────────────────────────
    print!("\n  Opening guardrail database {} … ", cfg.database_path.dimmed());
    let writer = match open_store(&cfg.database_path).and_then(|store| {
        PersistenceWriter::spawn(store).map_err(|e| e.to_string())
    }) {
        Ok(writer) => {
            println!("{}", "OK".green());
            Some(writer)
        }
        Err(e) => {
            println!("{}", "unavailable".yellow());
            println!("  {}  Decisions will be kept in memory only.", e.dimmed());
            None
        }
    };

    // ── Engine ────────────────────────────────────────────────────────────
    let engine = match GuardrailEngine::new(cfg.guardrail.clone()) {
        Ok(engine) => engine,
        Err(e) => {
            println!("{}: {}", "Invalid guardrail configuration".red(), e);
            if let Some(writer) = writer {
                writer.shutdown();
            }
            return;
        }
    };
    let engine = match &writer {
        Some(writer) => engine.with_persistence(writer.handle()),
        None => engine,
    };
    demo_checks::register_demo_checks(&engine);
    info!(agents = cfg.guardrail.agents.len(), "guardrail engine ready");

    println!(
        "  Guarding {} agent(s); breaker opens above {:.1}% of the last {} violations.",
        cfg.guardrail.agents.len(),
        cfg.guardrail.violation_rate_threshold * 100.0,
        cfg.guardrail.rate_window
    );
    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    let console = repl::Console {
        engine: Arc::new(engine),
        runtime: runtime.handle().clone(),
        database_path: cfg.database_path.clone(),
    };
    repl::run(shutdown, &console);

    // ── Shutdown ──────────────────────────────────────────────────────────
    drop(console);
    if let Some(writer) = writer {
        match writer.shutdown() {
            Some(_) => println!("  {} Pending guardrail records flushed.", "✓".green()),
            None => println!("  {} Persistence writer stopped abnormally.", "✗".red()),
        }
    }
    runtime.shutdown_background();
    println!("  {} Exiting Shepherd.", "✓".green());
}

fn open_store(path: &str) -> Result<Box<dyn GuardrailStore>, String> {
    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
    }
    let store = SqliteGuardrailStore::open(path).map_err(|e| e.to_string())?;
    Ok(Box::new(store))
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║      Shepherd First-Run Wizard       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up the guardrails.\n");

    let mut cfg = config::Config::default();

    cfg.database_path = repl::prompt_str(
        &format!("  Guardrail database path [{}]: ", cfg.database_path),
        &cfg.database_path,
    );
    cfg.guardrail.violation_rate_threshold = repl::prompt_parse(
        &format!(
            "  Violation rate threshold (0-1) [{}]: ",
            cfg.guardrail.violation_rate_threshold
        ),
        cfg.guardrail.violation_rate_threshold,
    );
    cfg.guardrail.cooldown_secs = repl::prompt_parse(
        &format!("  Breaker cool-down in seconds [{}]: ", cfg.guardrail.cooldown_secs),
        cfg.guardrail.cooldown_secs,
    );

    if let Err(e) = cfg.guardrail.validate() {
        println!("{}: {} – keeping defaults", "Invalid settings".red(), e);
        cfg.guardrail = Default::default();
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ______            __              __"#.bold().cyan());
    println!("{}", r#"  / __/ /  ___ ___  / /  ___ _______/ /"#.bold().cyan());
    println!("{}", r#" _\ \/ _ \/ -_) _ \/ _ \/ -_) __/ _  / "#.bold().cyan());
    println!("{}", r#"/___/_//_/\__/ .__/_//_/\__/_/  \_,_/  "#.bold().cyan());
    println!("{}", r#"            /_/                        "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Shepherd".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Guardrail policy engine for shopping agents");
    println!();
}
