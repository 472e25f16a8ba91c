use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::builder::FalseyValueParser;
use clap::{Parser, Subcommand};
use codegraphd::daemon::{Daemon, LockRecord, RunOutcome, process_alive};
use codegraphd::{Settings, logging, metrics};

#[derive(Parser)]
#[command(name = "codegraphd")]
#[command(about = "Live dependency-graph update daemon", version)]
struct Cli {
    /// Repository root to watch (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Configuration file (defaults to <root>/.graph/settings.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging (any non-falsey DEBUG value also enables it)
    #[arg(long, global = true, env = "DEBUG", value_parser = FalseyValueParser::new())]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground (default)
    Run,

    /// Show whether a daemon is running and its last metrics
    Status,

    /// Show the effective configuration
    Config,
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let settings = match (&cli.config, &cli.root) {
        (Some(path), _) => Settings::load_from(path),
        (None, Some(root)) => Settings::load(root),
        (None, None) => {
            let cwd = std::env::current_dir().context("cannot determine current directory")?;
            Settings::load(&cwd)
        }
    }
    .map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;

    Ok(apply_overrides(cli, settings))
}

/// Command-line flags win over file and environment configuration.
fn apply_overrides(cli: &Cli, mut settings: Settings) -> Settings {
    if let Some(root) = &cli.root {
        settings.repo_root = Some(root.clone());
    }
    if cli.debug {
        settings.logging.default = "debug".to_string();
    }
    settings
}

fn print_status(settings: &Settings) -> anyhow::Result<()> {
    let paths = settings.state_paths();
    match LockRecord::read(&paths.lock)? {
        LockRecord::Pid(pid) if process_alive(pid) => println!("running (pid {pid})"),
        LockRecord::Pid(pid) => println!("not running (stale lock for pid {pid})"),
        LockRecord::Corrupt => println!("not running (corrupt lock record)"),
        LockRecord::Missing => println!("not running"),
    }

    let document = metrics::read_document(&paths.metrics);
    match document.get(&settings.metrics_key) {
        Some(entry) => println!("{}", serde_json::to_string_pretty(entry)?),
        None => println!("no metrics recorded"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Config => match toml::to_string_pretty(&settings) {
            Ok(toml_str) => {
                println!("{toml_str}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error displaying config: {e}");
                ExitCode::FAILURE
            }
        },

        Commands::Status => match print_status(&settings) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {e:#}");
                ExitCode::FAILURE
            }
        },

        Commands::Run => {
            let paths = settings.state_paths();
            if let Err(e) = paths.ensure_state_dir() {
                eprintln!("Cannot create {}: {e}", paths.state_dir.display());
                return ExitCode::FAILURE;
            }
            let log = logging::init_with_config(&settings.logging, Some(&paths.log));

            match Daemon::new(settings).with_log_guard(log.clone()).run().await {
                Ok(RunOutcome::Stopped) => ExitCode::SUCCESS,
                // Refusing to double-start is not a failure
                Ok(RunOutcome::AlreadyRunning { .. }) => ExitCode::SUCCESS,
                Err(e) => {
                    tracing::error!("[daemon] startup failed: {e}");
                    log.flush();
                    ExitCode::FAILURE
                }
            }
        }
    }
}
