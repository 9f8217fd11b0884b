// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Run a task file
//!
//! Loads a JSON or YAML list of tasks, submits each one through a swarm
//! session and prints the outcome of every branch. Branch events are logged
//! through the tracing sink while the run is in progress.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use talon_core::application::strategies::{DeterministicStrategy, ReasoningStrategy};
use talon_core::application::{BranchCoordinator, StrategyFactory};
use talon_core::domain::agent::AgentProfile;
use talon_core::domain::branch::{BranchOutcome, BranchState};
use talon_core::domain::config::SwarmConfig;
use talon_core::domain::task::ExecutionTask;
use talon_core::infrastructure::{spawn_forwarder, TracingEventSink};
use talon_swarm::infrastructure::InMemorySwarmRepository;
use talon_swarm::SwarmCoordinator;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Task file: a JSON or YAML list of tasks
    #[arg(value_name = "TASKS")]
    pub tasks: PathBuf,

    /// Team member as NAME=CAP[,CAP...] (repeatable)
    #[arg(short, long = "agent", value_name = "AGENT")]
    pub agents: Vec<String>,

    /// Print outcomes as JSON lines
    #[arg(long)]
    pub json: bool,
}

pub async fn handle_command(args: RunArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = SwarmConfig::load_or_default(config_path).context("Failed to load configuration")?;
    let tasks = load_tasks(&args.tasks)?;
    let agents = args
        .agents
        .iter()
        .map(|spec| parse_agent(spec))
        .collect::<Result<Vec<_>>>()?;

    let strategies = StrategyFactory::new()
        .with(Arc::new(DeterministicStrategy::default()))
        .with(Arc::new(ReasoningStrategy::default()));
    let branches = BranchCoordinator::new(&config, strategies);
    let shutdown = CancellationToken::new();
    let forwarder = spawn_forwarder(
        branches.event_bus(),
        Arc::new(TracingEventSink),
        shutdown.clone(),
    );

    let swarm = SwarmCoordinator::new(config, branches, Arc::new(InMemorySwarmRepository::new()))?;
    if !agents.is_empty() {
        swarm.form_team(&agents).await?;
    }

    info!(tasks = tasks.len(), "Submitting tasks");
    let mut handles = Vec::with_capacity(tasks.len());
    let mut rejected = 0usize;
    for task in tasks {
        let task_id = task.id;
        match swarm.submit_task(task).await {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Task rejected at selection");
                rejected += 1;
                println!("{} {} {}", "✗".red(), task_id, e.to_string().red());
            }
        }
    }

    let outcomes = tokio::select! {
        outcomes = join_all(handles.iter().map(|h| h.wait())) => outcomes,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling running branches");
            swarm.shutdown();
            join_all(handles.iter().map(|h| h.wait())).await
        }
    };

    shutdown.cancel();
    let _ = forwarder.await;

    for outcome in &outcomes {
        print_outcome(outcome, args.json)?;
    }

    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    println!();
    println!(
        "{} succeeded, {} failed, {} rejected",
        (outcomes.len() - failed).to_string().green(),
        failed.to_string().red(),
        rejected.to_string().yellow()
    );
    if failed + rejected > 0 {
        bail!("{} task(s) did not succeed", failed + rejected);
    }
    Ok(())
}

fn print_outcome(outcome: &BranchOutcome, json: bool) -> Result<()> {
    if json {
        let line = serde_json::json!({
            "branchId": outcome.branch_id.to_string(),
            "taskId": outcome.task_id.to_string(),
            "state": outcome.state,
            "attempts": outcome.attempts,
            "output": outcome.output,
            "errorKind": outcome.error_kind(),
            "error": outcome.error.as_ref().map(|e| e.to_string()),
        });
        println!("{}", serde_json::to_string(&line)?);
        return Ok(());
    }

    let marker = match outcome.state {
        BranchState::Succeeded => "✓".green(),
        BranchState::Aborted => "⊘".yellow(),
        _ => "✗".red(),
    };
    println!(
        "{} {} {:?} ({} attempt(s))",
        marker, outcome.task_id, outcome.state, outcome.attempts
    );
    if let Some(output) = &outcome.output {
        println!("    {}", output);
    }
    if let Some(error) = &outcome.error {
        println!("    {}", error.to_string().red());
    }
    Ok(())
}

/// Read tasks from `path`. `.json` files parse as JSON, anything else as YAML.
pub fn load_tasks(path: &Path) -> Result<Vec<ExecutionTask>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read task file {:?}", path))?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let tasks: Vec<ExecutionTask> = if is_json {
        serde_json::from_str(&content).with_context(|| format!("Invalid JSON task file {:?}", path))?
    } else {
        serde_yaml::from_str(&content).with_context(|| format!("Invalid YAML task file {:?}", path))?
    };
    if tasks.is_empty() {
        bail!("Task file {:?} contains no tasks", path);
    }
    Ok(tasks)
}

/// Parse `NAME=CAP[,CAP...]`.
pub fn parse_agent(spec: &str) -> Result<AgentProfile> {
    let (name, capabilities) = spec
        .split_once('=')
        .with_context(|| format!("Agent '{}' must look like NAME=CAP[,CAP...]", spec))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("Agent '{}' has no name", spec);
    }
    let capabilities: Vec<&str> = capabilities
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();
    if capabilities.is_empty() {
        bail!("Agent '{}' declares no capabilities", name);
    }
    Ok(AgentProfile::new(name, capabilities))
}
