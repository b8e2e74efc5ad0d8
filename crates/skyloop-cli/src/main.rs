//! `skyloop` – the advisory control loop as a command-line program.
//!
//! 1. Loads `~/.skyloop/config.toml` (defaults when absent), then applies
//!    `SKYLOOP_*` environment overrides and command-line flags.
//! 2. Probes the Ollama instance and reports whether the configured model is
//!    available.  An offline oracle is not fatal: every cycle then holds.
//! 3. Connects to the vehicle and waits until it reports a usable global and
//!    home position.  Failure here exits with a non-zero status.
//! 4. Runs the control loop until Ctrl-C or the configured run duration, then
//!    the shutdown failsafe.  Operator commands are read from stdin unless a
//!    fixed mission is configured.

mod config;
mod ollama;

use std::io::{BufReader, Write};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use skyloop_hal::{connect, wait_until_ready};
use skyloop_runtime::{
    ActionExecutor, CommandMailbox, ControlLoop, FailsafeOutcome, OllamaOracle, Recovery,
    init_tracing, spawn_listener,
};

use crate::config::Config;

/// Timeout for the startup model probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "skyloop", version, about = "LLM-advised drone control loop")]
struct Cli {
    /// Stop after this many seconds and run the failsafe.
    #[arg(long, value_name = "SECS", value_parser = non_negative_secs)]
    duration: Option<f64>,

    /// Pause between control cycles, in seconds.
    #[arg(long, value_name = "SECS", value_parser = non_negative_secs)]
    interval: Option<f64>,

    /// Fly a fixed mission instead of reading commands from stdin.
    #[arg(long)]
    mission: Option<String>,

    /// Oracle model name (e.g. `llama3.2:1b`).
    #[arg(long)]
    model: Option<String>,

    /// Base URL of the Ollama server.
    #[arg(long, value_name = "URL")]
    ollama_url: Option<String>,

    /// Vehicle address (e.g. `sim://`).
    #[arg(long, value_name = "ADDRESS")]
    vehicle: Option<String>,

    /// Save the effective configuration to ~/.skyloop/config.toml.
    #[arg(long)]
    write_config: bool,
}

impl Cli {
    fn apply_to(&self, cfg: &mut Config) {
        if let Some(d) = self.duration {
            cfg.run_duration_secs = Some(d);
        }
        if let Some(i) = self.interval {
            cfg.update_interval_secs = i;
        }
        if let Some(m) = &self.mission {
            cfg.mission = Some(m.clone());
        }
        if let Some(m) = &self.model {
            cfg.model = m.clone();
        }
        if let Some(u) = &self.ollama_url {
            cfg.ollama_url = u.clone();
        }
        if let Some(v) = &self.vehicle {
            cfg.vehicle_address = v.clone();
        }
    }
}

fn non_negative_secs(s: &str) -> Result<f64, String> {
    match s.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err(format!("'{s}' is not a non-negative number of seconds")),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Hold the guard for the whole process so OTLP spans are flushed.
    let _tracing = init_tracing("skyloop");

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let mut cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    cli.apply_to(&mut cfg);
    info!(config = ?cfg, "effective configuration");

    if cli.write_config {
        match config::save(&cfg) {
            Ok(()) => println!(
                "  {} Config saved to {}",
                "✓".green().bold(),
                config::config_path().display().to_string().bold()
            ),
            Err(e) => println!("{}: {}", "Error saving config".red(), e),
        }
    }

    // ── Oracle discovery ──────────────────────────────────────────────────
    probe_oracle(&cfg);

    // ── Flight ────────────────────────────────────────────────────────────
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(fly(cfg))
}

async fn fly(cfg: Config) -> ExitCode {
    let vehicle = match connect(&cfg.vehicle_address).await {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "vehicle connection failed");
            println!("{}: {}", "Connection failed".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let executor_config = cfg.executor();
    if let Err(e) = wait_until_ready(
        vehicle.as_ref(),
        cfg.ready_timeout(),
        executor_config.poll_interval,
    )
    .await
    {
        error!(error = %e, "vehicle not ready");
        println!("{}: {}", "Vehicle not ready".red().bold(), e);
        return ExitCode::FAILURE;
    }
    println!("  {} Vehicle ready at {}", "✓".green().bold(), cfg.vehicle_address.bold());

    // ── Ctrl-C ────────────────────────────────────────────────────────────
    let (stop_tx, stop_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – landing and shutting down …".yellow().bold());
        // No receivers left means the loop has already finished.
        let _ = stop_tx.send(true);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; stop with the run duration instead");
    }

    // ── Operator commands ─────────────────────────────────────────────────
    let mission = cfg
        .mission
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty());
    let mailbox = match mission {
        Some(mission) => {
            println!("  Flying scripted mission: {}", mission.italic());
            CommandMailbox::new(mission)
        }
        None => {
            let mailbox = CommandMailbox::default();
            spawn_listener(BufReader::new(std::io::stdin()), mailbox.clone(), stop_rx.clone());
            println!(
                "  Type a command and press {} to steer the drone; {} stops and lands.\n",
                "Enter".bold().cyan(),
                "Ctrl-C".bold().cyan()
            );
            mailbox
        }
    };

    let oracle = OllamaOracle::new(&cfg.ollama_url, &cfg.model, cfg.oracle_timeout());
    let executor = ActionExecutor::new(vehicle, executor_config);
    let mut control = ControlLoop::new(executor, Box::new(oracle), mailbox, cfg.control_loop());

    let outcome = control.run(stop_rx).await;
    report(&outcome, control.cycles());
    ExitCode::SUCCESS
}

// ─────────────────────────────────────────────────────────────────────────────
// Console output
// ─────────────────────────────────────────────────────────────────────────────

fn probe_oracle(cfg: &Config) {
    print!("\n  Probing Ollama at {} … ", cfg.ollama_url.dimmed());
    std::io::stdout().flush().ok();
    match ollama::fetch_models(&cfg.ollama_url, PROBE_TIMEOUT) {
        Ok(models) => {
            println!("{} ({} model(s) available)", "online".green(), models.len());
            if ollama::has_model(&models, &cfg.model) {
                println!("  Oracle model: {}", cfg.model.bold());
            } else {
                warn!(model = %cfg.model, "oracle model not found on server");
                println!(
                    "  {} Model {} not found.  Run `{}` to download it.",
                    "⚠".yellow(),
                    cfg.model.bold(),
                    format!("ollama pull {}", cfg.model).bold()
                );
            }
        }
        Err(e) => {
            warn!(error = %e, "oracle offline; every cycle will hold until it answers");
            println!("{}", "offline".yellow());
            println!(
                "  {}  Run `{}` to start a local AI.",
                "No Ollama instance detected.".dimmed(),
                "ollama serve".bold()
            );
        }
    }
    println!();
}

fn report(outcome: &FailsafeOutcome, cycles: u64) {
    println!();
    println!("  Control loop finished after {} cycle(s).", cycles);
    match outcome {
        FailsafeOutcome::AlreadyRan => {}
        FailsafeOutcome::Completed {
            recovery,
            shutdown_error,
        } => {
            match recovery {
                Recovery::NotNeeded => println!("  {} Vehicle was on the ground.", "✓".green()),
                Recovery::ReturnedToLaunch => {
                    println!("  {} Returned to launch.", "✓".green())
                }
                Recovery::Landed => println!("  {} RTL failed; landed in place.", "⚠".yellow()),
                Recovery::Failed(e) => {
                    println!("  {} Could not bring the vehicle down: {}", "✗".red().bold(), e)
                }
            }
            match shutdown_error {
                None => println!("  {} Disarmed and motors stopped.", "✓".green()),
                Some(e) => println!("  {} Final disarm failed: {}", "✗".red().bold(), e),
            }
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"       __          __                "#.bold().cyan());
    println!("{}", r#"  ___ / /____ __  / /__  ___  ___    "#.bold().cyan());
    println!("{}", r#" (_-</  '_/ // / / / _ \/ _ \/ _ \   "#.bold().cyan());
    println!("{}", r#"/___/_/\_\\_, / /_/\___/\___/ .__/   "#.bold().cyan());
    println!("{}", r#"         /___/             /_/       "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "skyloop".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  LLM-advised drone control loop");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "skyloop",
            "--duration",
            "120",
            "--interval",
            "1.5",
            "--mission",
            "Take off to 10m and land",
            "--model",
            "qwen2.5:3b",
            "--ollama-url",
            "http://gpu-box:11434",
            "--vehicle",
            "sim://",
        ])
        .expect("valid flags");
        let mut cfg = Config::default();
        cli.apply_to(&mut cfg);

        assert_eq!(cfg.run_duration_secs, Some(120.0));
        assert_eq!(cfg.update_interval_secs, 1.5);
        assert_eq!(cfg.mission.as_deref(), Some("Take off to 10m and land"));
        assert_eq!(cfg.model, "qwen2.5:3b");
        assert_eq!(cfg.ollama_url, "http://gpu-box:11434");
        assert!(!cli.write_config);
    }

    #[test]
    fn absent_flags_leave_config_untouched() {
        let cli = Cli::try_parse_from(["skyloop"]).expect("no flags");
        let mut cfg = Config::default();
        cli.apply_to(&mut cfg);
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn negative_duration_is_rejected() {
        assert!(Cli::try_parse_from(["skyloop", "--duration", "-5"]).is_err());
        assert!(Cli::try_parse_from(["skyloop", "--interval", "soon"]).is_err());
    }
}
