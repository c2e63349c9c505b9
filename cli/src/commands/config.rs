// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use callcred_core::domain::config::ClientConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Write the default configuration as YAML
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./callcred.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output } => generate(output).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = ClientConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. CALLCRED_CONFIG_PATH: {}",
            std::env::var("CALLCRED_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./callcred.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    println!("{}", "Invoker:".bold());
    println!("  Scheduling: {}", config.spec.invoker.scheduling);
    println!();

    let transport = &config.spec.transport;
    println!("{}", "Transport:".bold());
    println!("  Wait for ready: {}", transport.wait_for_ready);
    println!("  Connect timeout: {:?}", transport.connect_timeout());
    println!("  Connect retry: {:?}", transport.connect_retry());
    match transport.call_timeout() {
        Some(timeout) => println!("  Call timeout: {:?}", timeout),
        None => println!("  Call timeout: {}", "(none)".dimmed()),
    }
    println!(
        "  Required metadata: {}",
        transport.require_metadata_key.as_deref().unwrap_or("(none)")
    );
    match &transport.socket_path {
        Some(path) => println!("  Socket: {}", path.display()),
        None => println!("  Socket: {}", "(temporary)".dimmed()),
    }
    println!();

    let load = &config.spec.load;
    println!("{}", "Load:".bold());
    println!("  Workers: {}", load.workers);
    println!("  Calls per worker: {}", load.calls_per_worker);
    println!("  Payload: {:?}", load.payload);
    println!();

    println!("{}", "Logging:".bold());
    println!("  Level: {}", config.spec.logging.level);
    println!("  Format: {}", config.spec.logging.format);

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = ClientConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf) -> Result<()> {
    let yaml = ClientConfigManifest::default().to_yaml_string()?;

    std::fs::write(&output, yaml)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
