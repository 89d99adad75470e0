//! Helm CLI.
//!
//! Inspect governance configuration and replay upgrade scenarios against an
//! in-memory governor.
//!
//! # Quick Start
//!
//! ```bash
//! # Show the resolved configuration for the current project
//! helm config
//!
//! # Replay a scenario and print the audit log
//! helm simulate demos/governed-upgrade.json
//! ```

mod commands;
mod script;
mod table;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Helm - governed upgrades for versioned systems.
#[derive(Parser)]
#[command(name = "helm")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information.
    Version,

    /// Show the resolved configuration.
    Config {
        /// Project directory containing helm.toml.
        #[arg(short, long, default_value = ".")]
        project: String,

        /// Output format (text, toml, json).
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Replay a JSON scenario script and print the resulting audit log.
    Simulate {
        /// Path to the scenario script.
        script: String,

        /// Project directory whose configuration supplies governance parameters.
        #[arg(short, long, default_value = ".")]
        project: String,

        /// Stop at the first failing step and exit with an error.
        #[arg(long)]
        fail_fast: bool,

        /// Print the final state as JSON instead of tables.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
        Commands::Config { project, format } => commands::config::show(&project, &format),
        Commands::Simulate {
            script,
            project,
            fail_fast,
            json,
        } => commands::simulate::run(&script, &project, fail_fast, json),
    }
}
