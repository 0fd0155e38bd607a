//! Skein - inspection CLI for Model Context Protocol servers.
//!
//! Main entry point for the skein CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{call, inspect, read, servers};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Skein - inspection CLI for Model Context Protocol servers
#[derive(Parser)]
#[command(name = "skein")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Directory holding the user config.toml
    #[arg(long, global = true, env = "SKEIN_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List configured servers
    Servers(servers::ServersArgs),

    /// Connect to a server and show what it offers
    Inspect(inspect::InspectArgs),

    /// Call a tool
    Call(call::CallArgs),

    /// Read a resource
    Read(read::ReadArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Console (human-readable, stderr) + rotating JSON file
    let filter = if cli.verbose {
        "skein=debug,skein_mcp=debug,skein_config=debug,info"
    } else {
        "skein=info,skein_mcp=warn,skein_config=warn,warn"
    };

    let log_dir = cli
        .config_dir
        .clone()
        .or_else(skein_config::xdg_config_dir)
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "skein.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "skein=trace,skein_mcp=trace,skein_config=trace,info",
                )),
        )
        .init();

    let ctx = commands::Context {
        config_dir: cli.config_dir,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Servers(args) => servers::run(args, &ctx),
        Commands::Inspect(args) => inspect::run(args, &ctx),
        Commands::Call(args) => call::run(args, &ctx),
        Commands::Read(args) => read::run(args, &ctx),
    }
}
