// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # callcred CLI
//!
//! Exercises credential plugins against an in-process echo server listening
//! on a temporary Unix socket.
//!
//! ## Commands
//!
//! - `callcred probe` - One call with an ambient value set, checked by the plugin
//! - `callcred load` - Many workers sharing one plugin and one channel
//! - `callcred config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use callcred_core::domain::config::ClientConfigManifest;

mod commands;

use commands::{ConfigCommand, LoadArgs, ProbeArgs};

/// Per-call credential plugin harness
#[derive(Parser)]
#[command(name = "callcred")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "CALLCRED_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format. Defaults to the configured format.
    #[arg(long, global = true, value_parser = ["text", "json"])]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue one call with an ambient value set
    #[command(name = "probe")]
    Probe(ProbeArgs),

    /// Run concurrent workers against one shared channel
    #[command(name = "load")]
    Load(LoadArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let manifest = ClientConfigManifest::load_or_default(cli.config.clone())
        .context("Failed to load configuration")?;

    let level = cli.log_level.as_deref().unwrap_or(&manifest.spec.logging.level);
    let format = cli.log_format.as_deref().unwrap_or(&manifest.spec.logging.format);
    init_logging(level, format)?;
    debug!(name = %manifest.metadata.name, "Configuration resolved");

    match cli.command {
        Commands::Probe(args) => commands::probe::execute(args, manifest).await,
        Commands::Load(args) => commands::load::execute(args, manifest).await,
        Commands::Config { command } => commands::config::handle_command(command, cli.config).await,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if format == "json" {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
