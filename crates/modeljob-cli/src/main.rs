//! modeljob CLI
//!
//! Drives the scheduler from the command line: a multi-owner stress run that
//! checks mutual exclusion, and a dump of the effective configuration.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "modeljob")]
#[command(author, version, about = "Single-owner mutual-exclusion job scheduler", long_about = None)]
struct Cli {
    /// When to use colors: auto, always, never
    #[arg(long, global = true, value_name = "WHEN")]
    color: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run jobs for many owners concurrently and verify they never overlap
    Stress {
        /// Number of owners
        #[arg(long, default_value_t = 8)]
        owners: usize,

        /// Jobs scheduled per owner
        #[arg(long, default_value_t = 100)]
        jobs: usize,

        /// Core worker threads (defaults to the configured pool size)
        #[arg(long)]
        workers: Option<usize>,

        /// Make every Nth job wait on a blocking condition lifted by its successor
        #[arg(long, default_value_t = 0)]
        block_every: usize,

        /// Seconds to wait for all jobs before giving up
        #[arg(long, default_value_t = 60)]
        timeout: u64,

        /// Configuration file (modeljob.toml)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Configuration file (modeljob.toml)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let color = output::resolve_color_choice(cli.color.as_deref());

    match cli.command {
        Commands::Stress {
            owners,
            jobs,
            workers,
            block_every,
            timeout,
            config,
            json,
        } => commands::stress::execute(commands::stress::StressOptions {
            owners,
            jobs,
            workers,
            block_every,
            timeout_secs: timeout,
            config,
            json,
            color,
        }),
        Commands::Config { config } => commands::config::execute(config.as_deref()),
    }
}
