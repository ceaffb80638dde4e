//! RegimeWatch CLI — alert cycles, daily reports, cooldown and config management.
//!
//! Commands:
//! - `alerts`: run one alert cycle; emitted alerts as JSON lines on stdout
//! - `report`: daily report (regime + every triggered rule) as JSON
//! - `cooldowns status`: last-fired time and elapsed minutes per key
//! - `cooldowns clear`: forget every cooldown record
//! - `config check`: validate a TOML config file
//! - `config defaults`: print the default config as TOML
//!
//! Logs go to stderr; filter with `RUST_LOG`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use regimewatch_core::{
    AlertEngine, CooldownBackend, EngineConfig, IndicatorSnapshot, JsonFileStore, WatchConfig,
};

#[derive(Parser)]
#[command(
    name = "regimewatch",
    about = "RegimeWatch: market regime classification and cooldown-gated alerts"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one alert cycle against a snapshot and a cooldown state file.
    Alerts {
        /// Indicator snapshot (JSON).
        #[arg(long)]
        snapshot: PathBuf,

        /// Cooldown state file. Created if missing.
        #[arg(long, default_value = "state.json")]
        state: PathBuf,

        /// TOML config. Defaults to the built-in thresholds and rules.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Evaluation time (RFC 3339). Defaults to now.
        #[arg(long)]
        now: Option<String>,

        /// Print the whole cycle report instead of one line per alert.
        #[arg(long, default_value_t = false)]
        full: bool,
    },
    /// Build the daily report. Cooldowns are neither checked nor updated.
    Report {
        /// Indicator snapshot (JSON).
        #[arg(long)]
        snapshot: PathBuf,

        /// TOML config. Defaults to the built-in thresholds and rules.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Cooldown state commands.
    Cooldowns {
        #[command(subcommand)]
        action: CooldownAction,
    },
    /// Configuration commands.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum CooldownAction {
    /// Show last-fired time and elapsed minutes for every key.
    Status {
        #[arg(long, default_value = "state.json")]
        state: PathBuf,

        /// Reference time (RFC 3339). Defaults to now.
        #[arg(long)]
        now: Option<String>,
    },
    /// Forget every cooldown record.
    Clear {
        #[arg(long, default_value = "state.json")]
        state: PathBuf,

        /// Actually clear (without this flag, only previews what would be removed).
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a config file and summarize the resulting rule set.
    Check {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the default configuration as TOML.
    Defaults,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("regimewatch_core=info".parse()?)
                .add_directive("regimewatch=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Alerts {
            snapshot,
            state,
            config,
            now,
            full,
        } => run_alerts(&snapshot, &state, config.as_deref(), now.as_deref(), full),
        Commands::Report { snapshot, config } => run_report(&snapshot, config.as_deref()),
        Commands::Cooldowns { action } => match action {
            CooldownAction::Status { state, now } => run_cooldown_status(&state, now.as_deref()),
            CooldownAction::Clear { state, confirm } => run_cooldown_clear(&state, confirm),
        },
        Commands::Config { action } => match action {
            ConfigAction::Check { config } => run_config_check(config.as_deref()),
            ConfigAction::Defaults => run_config_defaults(),
        },
    }
}

fn parse_now(now: Option<&str>) -> Result<DateTime<Utc>> {
    match now {
        Some(text) => Ok(DateTime::parse_from_rfc3339(text)
            .with_context(|| format!("invalid --now '{text}'"))?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}

fn load_snapshot(path: &Path) -> Result<IndicatorSnapshot> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read snapshot {}", path.display()))?;
    let snapshot = IndicatorSnapshot::from_json(&text)
        .with_context(|| format!("malformed snapshot {}", path.display()))?;
    Ok(snapshot)
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    Ok(EngineConfig::from_path(path)?)
}

fn run_alerts(
    snapshot_path: &Path,
    state_path: &Path,
    config_path: Option<&Path>,
    now: Option<&str>,
    full: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let snapshot = load_snapshot(snapshot_path)?;
    let now = parse_now(now)?;
    let store = JsonFileStore::new(state_path);

    let report = AlertEngine::new(&config).run_alert_cycle(&snapshot, &store, now)?;

    if full {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for alert in &report.emitted {
            println!("{}", serde_json::to_string(alert)?);
        }
    }
    Ok(())
}

fn run_report(snapshot_path: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let snapshot = load_snapshot(snapshot_path)?;
    let report = AlertEngine::new(&config).daily_report(&snapshot)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_cooldown_status(state_path: &Path, now: Option<&str>) -> Result<()> {
    let now = parse_now(now)?;
    let state = JsonFileStore::new(state_path).load()?;
    if state.is_empty() {
        info!(path = %state_path.display(), "no cooldown records");
    }
    for row in state.status(now) {
        println!("{}", serde_json::to_string(&row)?);
    }
    Ok(())
}

fn run_cooldown_clear(state_path: &Path, confirm: bool) -> Result<()> {
    let store = JsonFileStore::new(state_path);
    let mut state = store.load()?;

    if !confirm {
        println!(
            "Would clear {} cooldown record(s) from {}. Pass --confirm to clear.",
            state.len(),
            state_path.display()
        );
        for (key, at) in state.iter() {
            println!("  {key}  last fired {at}");
        }
        return Ok(());
    }

    let cleared = state.len();
    state.clear();
    store.save(&state)?;
    info!(cleared, path = %state_path.display(), "cooldowns cleared");
    Ok(())
}

fn run_config_check(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let enabled = config.rules().iter().filter(|r| r.enabled).count();
    println!(
        "Config OK: {} rule(s), {} enabled, ladder policy {:?}",
        config.rules().len(),
        enabled,
        config.ladder_policy()
    );
    for rule in config.rules() {
        println!(
            "  {:<28} {:<8} {}{}",
            rule.id,
            rule.severity.as_str(),
            rule.description,
            if rule.enabled { "" } else { " (disabled)" }
        );
    }
    Ok(())
}

fn run_config_defaults() -> Result<()> {
    print!("{}", toml::to_string_pretty(&WatchConfig::default())?);
    Ok(())
}
