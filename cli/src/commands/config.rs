// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use talon_core::domain::config::SwarmConfig;
use talon_core::domain::strategy::StrategyKind;

const EXAMPLES_HEADER: &str = "\
# Talon orchestrator configuration
#
# Every key is optional; omitted keys take the defaults shown below.
#
#   poolCapacity       concurrent strategy invocations
#   leaseTimeoutMs     longest wait for a pool slot or rate tokens
#   rateLimit          token bucket in front of every strategy call
#   retry              attempts and backoff for transient failures
#   circuitBreaker     failure threshold that stops dispatch for cooldownMs
#   reflection         when and how strongly failing strategies are demoted
#   team               team-size bounds and required capabilities
#   strategyWeights    starting selection weight per strategy (default 1.0)
#   security           capability allow/deny patterns, e.g. \"compute.*\"
#
";

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

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./talon-config.yaml)
        #[arg(short, long, default_value = "./talon-config.yaml")]
        output: PathBuf,

        /// Include a commented description of every section
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = SwarmConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. TALON_CONFIG_PATH: {}",
            std::env::var("TALON_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./talon-config.yaml");
        println!("  4. ~/.talon/config.yaml");
        println!("  5. /etc/talon/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Execution:".bold());
    println!("  Pool capacity: {}", config.pool_capacity);
    println!("  Lease timeout: {}ms", config.lease_timeout_ms);
    println!("  Max reasoning depth: {}", config.max_depth);
    println!(
        "  Rate limit: burst {} (max {}), {}/s refill",
        config.rate_limit.burst, config.rate_limit.capacity, config.rate_limit.refill_rate
    );
    println!();

    println!("{}", "Retry:".bold());
    println!("  Max attempts: {}", config.retry.max_attempts);
    println!(
        "  Backoff: {}ms → {}ms (jitter {})",
        config.retry.base_delay_ms, config.retry.max_delay_ms, config.retry.jitter_ratio
    );
    println!("  Max requeues: {}", config.retry.max_requeues);
    println!();

    println!("{}", "Circuit breaker:".bold());
    println!(
        "  Opens after {} failures in {}ms (rate ≥ {}), cooldown {}ms",
        config.circuit_breaker.failure_threshold,
        config.circuit_breaker.window_ms,
        config.circuit_breaker.min_failure_rate,
        config.circuit_breaker.cooldown_ms
    );
    println!();

    println!("{}", "Strategy weights:".bold());
    for kind in StrategyKind::ALL {
        println!("  {}: {}", kind, config.weight_for(kind));
    }
    println!();

    println!("{}", "Security:".bold());
    println!("  Allow: {}", config.security.allow.join(", "));
    if config.security.deny.is_empty() {
        println!("  Deny: {}", "(none)".dimmed());
    } else {
        println!("  Deny: {}", config.security.deny.join(", "));
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = SwarmConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let yaml = SwarmConfig::default().to_yaml()?;
    let sample = if with_examples {
        format!("{}{}", EXAMPLES_HEADER, yaml)
    } else {
        yaml
    };

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
