//! Operator-facing bootstrap entry point (§6.2).
//!
//! Loads a configuration (a named preset or a JSON file), constructs a
//! `MessageSystem`, then either runs a fixed number of scheduling cycles or
//! dumps introspection (subsystem list, recent kernel errors, scheduler
//! stats) to stdout. No network socket is opened; remote access to these
//! operations belongs to an external transport.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use facetkernel::{init_tracing, MessageSystem, RuntimeConfig, TracingFormat};

#[derive(Parser)]
#[command(name = "facetkernel-cli", about = "Operator entry point for a facetkernel runtime")]
struct Cli {
    /// Named preset to build the configuration from.
    #[arg(long, default_value = "development", conflicts_with = "config_file")]
    preset: String,

    /// Path to a JSON configuration file, overriding `--preset`.
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// Emit newline-delimited JSON logs instead of pretty ANSI output.
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lists every registered application subsystem.
    ListSubsystems,
    /// Dumps the most recent kernel-recorded errors.
    RecentErrors {
        /// Maximum number of records to print.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Runs a fixed number of scheduling cycles and reports what ran.
    RunCycles {
        /// Number of `GlobalScheduler::run_once` calls to perform.
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<RuntimeConfig> {
    if let Some(path) = &cli.config_file {
        let contents = std::fs::read_to_string(path)?;
        return Ok(RuntimeConfig::from_json(&contents)?);
    }
    Ok(match cli.preset.as_str() {
        "production" => RuntimeConfig::production(),
        "testing" => RuntimeConfig::testing(),
        _ => RuntimeConfig::development(),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let format = if cli.json_logs { TracingFormat::Json } else { TracingFormat::Pretty };
    let _ = init_tracing(format);

    let config = load_config(&cli)?;
    config.validate()?;
    let system = MessageSystem::new(config)?;

    match cli.command {
        Command::ListSubsystems => {
            for name in system.subsystem_names() {
                println!("{name}");
            }
        }
        Command::RecentErrors { limit } => {
            for record in system.kernel().error_manager.store().recent(limit) {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Command::RunCycles { count } => {
            system.start();
            for _ in 0..count {
                match system.run_once().await {
                    Some(name) => println!("scheduled: {name}"),
                    None => println!("nothing to schedule"),
                }
            }
        }
    }

    Ok(())
}
