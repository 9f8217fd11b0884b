// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Coordinator
//!
//! Top of the submission path. For each task the coordinator picks a strategy
//! from performance history, assigns an agent from the formed team, records the
//! decision and hands the task to the [`BranchCoordinator`].
//!
//! Feedback comes back through the branch coordinator's [`RollingHistory`]:
//! [`SwarmCoordinator::reflect`] demotes strategies (and flags agents) that
//! keep failing inside the reflection window, and restores them after a clean
//! streak. [`SwarmState`] has exactly one writer, this coordinator; callers
//! get snapshots.
//!
//! State and metrics are persisted through the [`SwarmRepository`] port after
//! every decision and reflection. Persistence failures are logged and never
//! fail the caller.
//!
//! [`RollingHistory`]: talon_core::infrastructure::rolling_history::RollingHistory

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use talon_core::application::{BranchCoordinator, BranchHandle};
use talon_core::domain::agent::{AgentId, AgentProfile};
use talon_core::domain::config::SwarmConfig;
use talon_core::domain::error::{ErrorKind, OrchestratorError};
use talon_core::domain::strategy::StrategyKind;
use talon_core::domain::task::ExecutionTask;
use talon_core::infrastructure::rolling_history::HistoryPattern;

use crate::application::selection::{rank, StrategySelection};
use crate::application::team::form_team;
use crate::domain::repository::{RepositoryError, SwarmRepository};
use crate::domain::swarm::{
    Demotion, ReflectionReport, SwarmDecision, SwarmId, SwarmMetrics, SwarmState, SwarmTeam,
};

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("swarm repository: {0}")]
    Repository(#[from] RepositoryError),
}

impl SwarmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Orchestrator(e) => e.kind(),
            Self::Repository(_) => ErrorKind::Permanent,
        }
    }
}

pub struct SwarmCoordinator {
    config: SwarmConfig,
    branches: BranchCoordinator,
    repository: Arc<dyn SwarmRepository>,
    state: RwLock<SwarmState>,
    next_agent: AtomicUsize,
}

impl SwarmCoordinator {
    /// Start a fresh session. The config is validated and then fixed for the
    /// coordinator's lifetime.
    pub fn new(
        config: SwarmConfig,
        branches: BranchCoordinator,
        repository: Arc<dyn SwarmRepository>,
    ) -> Result<Self, SwarmError> {
        config.validate()?;
        let weights: BTreeMap<StrategyKind, f64> = branches
            .strategies()
            .registered()
            .into_iter()
            .map(|kind| (kind, config.weight_for(kind)))
            .collect();
        let state = SwarmState::new(weights);
        info!(swarm_id = %state.id, "Swarm session started");
        Ok(Self {
            config,
            branches,
            repository,
            state: RwLock::new(state),
            next_agent: AtomicUsize::new(0),
        })
    }

    /// Resume a persisted session, seeding the performance tracker from the
    /// stored aggregates.
    pub async fn resume(
        config: SwarmConfig,
        branches: BranchCoordinator,
        repository: Arc<dyn SwarmRepository>,
        id: SwarmId,
    ) -> Result<Self, SwarmError> {
        config.validate()?;
        let state = repository
            .load_state(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("swarm {}", id)))?;
        if let Some(metrics) = repository.load_metrics(id).await? {
            branches.performance().restore(&metrics.strategies);
        }
        info!(swarm_id = %id, decisions = state.decisions.len(), "Swarm session resumed");
        Ok(Self {
            config,
            branches,
            repository,
            state: RwLock::new(state),
            next_agent: AtomicUsize::new(0),
        })
    }

    pub fn id(&self) -> SwarmId {
        self.state.read().id
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn branches(&self) -> &BranchCoordinator {
        &self.branches
    }

    /// Read-only snapshot of the session state.
    pub fn state(&self) -> SwarmState {
        self.state.read().clone()
    }

    /// Form the session's team from `agents` under the configured size bounds.
    pub async fn form_team(&self, agents: &[AgentProfile]) -> Result<SwarmTeam, SwarmError> {
        let team = form_team(&self.config.team, agents)?;
        info!(
            members = team.len(),
            capabilities = team.coverage.len(),
            "Swarm team formed"
        );
        {
            let mut state = self.state.write();
            state.team = Some(team.clone());
            state.touch();
        }
        self.persist().await;
        Ok(team)
    }

    /// Pick the strategy for `task`.
    ///
    /// Candidates are the registered strategies able to run the task's
    /// features, narrowed to the task's hint when it carries one.
    pub fn select_strategy(&self, task: &ExecutionTask) -> Result<StrategySelection, SwarmError> {
        let mut candidates = self.branches.strategies().compatible(&task.features);
        if let Some(hint) = task.strategy_hint {
            candidates.retain(|kind| *kind == hint);
            if candidates.is_empty() {
                return Err(OrchestratorError::UnknownStrategy(format!(
                    "hinted strategy '{}' is not registered or cannot run this task",
                    hint
                ))
                .into());
            }
        }

        let state = self.state.read();
        let performance = self.branches.performance();
        rank(&candidates, |kind| state.weight(kind), |kind| performance.metrics(kind)).ok_or_else(|| {
            OrchestratorError::UnknownStrategy(format!(
                "no registered strategy supports features {:?}",
                task.features
            ))
            .into()
        })
    }

    /// Append `decision` to the log. Runs a reflection pass when the decision
    /// was made with low confidence or its strategy is on a failure streak.
    pub async fn record_decision(&self, decision: SwarmDecision) -> Option<ReflectionReport> {
        let reflection = &self.config.reflection;
        let low_confidence = decision.confidence < reflection.confidence_threshold;
        let streak = self.branches.history().failure_streak(decision.chosen_strategy);

        metrics::counter!("talon_swarm_decisions_total", "strategy" => decision.chosen_strategy.as_str())
            .increment(1);
        debug!(
            task_id = %decision.task_id,
            strategy = %decision.chosen_strategy,
            confidence = decision.confidence,
            "Recorded swarm decision"
        );
        {
            let mut state = self.state.write();
            if let Some(agent) = decision.agent {
                state.assignments.insert(decision.task_id, agent);
            }
            state.decisions.push(decision);
            state.touch();
        }

        if low_confidence || streak >= reflection.failure_streak {
            debug!(low_confidence, streak, "Decision triggers reflection");
            Some(self.reflect().await)
        } else {
            self.persist().await;
            None
        }
    }

    /// Adjust strategy weights and agent flags from the rolling history.
    pub async fn reflect(&self) -> ReflectionReport {
        let reflection = &self.config.reflection;
        let window = self.config.history_window();
        let history = self.branches.history();
        let now = Utc::now();

        let report = {
            let mut state = self.state.write();
            let mut demoted = Vec::new();
            let mut restored = Vec::new();

            for kind in self.branches.strategies().registered() {
                let acted_until = state.demotions.get(&kind).map(|d| d.demoted_at);
                let failures = history
                    .matches(&HistoryPattern::failures_of(kind, window))
                    .iter()
                    .filter(|e| acted_until.map_or(true, |at| e.timestamp > at))
                    .count();

                if failures >= reflection.failure_threshold {
                    let current = state.weight(kind);
                    let base_weight = state.demotions.get(&kind).map_or(current, |d| d.base_weight);
                    let weight = (current * reflection.demotion_factor).max(reflection.min_weight);
                    state.weights.insert(kind, weight);
                    state.demotions.insert(
                        kind,
                        Demotion {
                            base_weight,
                            demoted_at: now,
                        },
                    );
                    warn!(strategy = %kind, failures, weight, "Strategy demoted");
                    metrics::counter!("talon_strategy_demotions_total", "strategy" => kind.as_str()).increment(1);
                    demoted.push(kind);
                } else if let Some(demotion) = state.demotions.get(&kind).copied() {
                    if history.clean_streak(kind) >= reflection.promote_after {
                        state.weights.insert(kind, demotion.base_weight);
                        state.demotions.remove(&kind);
                        info!(strategy = %kind, weight = demotion.base_weight, "Strategy demotion cleared");
                        restored.push(kind);
                    }
                }
                metrics::gauge!("talon_strategy_weight", "strategy" => kind.as_str()).set(state.weight(kind));
            }

            let mut flagged = Vec::new();
            let mut cleared = Vec::new();
            let members: Vec<AgentId> = state
                .team
                .as_ref()
                .map(|t| t.members.iter().map(|m| m.id).collect())
                .unwrap_or_default();
            for agent in members {
                let failures = history.agent_failures_within(agent, window);
                if failures >= reflection.failure_threshold {
                    if state.flagged_agents.insert(agent) {
                        warn!(agent_id = %agent, failures, "Agent flagged after repeated failures");
                        flagged.push(agent);
                    }
                } else if failures == 0 && state.flagged_agents.remove(&agent) {
                    info!(agent_id = %agent, "Agent flag cleared");
                    cleared.push(agent);
                }
            }

            state.reflections += 1;
            state.touch();
            ReflectionReport {
                demoted,
                restored,
                flagged_agents: flagged,
                cleared_agents: cleared,
                weights: state.weights.clone(),
                generated_at: now,
            }
        };

        if report.changed() {
            info!(
                demoted = ?report.demoted,
                restored = ?report.restored,
                flagged = report.flagged_agents.len(),
                "Reflection adjusted the swarm"
            );
        }
        self.persist().await;
        report
    }

    /// Select a strategy, assign an agent, record the decision and dispatch.
    pub async fn submit_task(&self, task: ExecutionTask) -> Result<BranchHandle, SwarmError> {
        let selection = self.select_strategy(&task)?;
        let agent = self.assign_agent(&task);
        let decision = SwarmDecision::new(task.id, selection.strategy, selection.confidence).with_agent(agent);
        self.record_decision(decision).await;

        info!(
            task_id = %task.id,
            strategy = %selection.strategy,
            confidence = selection.confidence,
            "Submitting task"
        );
        Ok(self.branches.dispatch_for_agent(task, selection.strategy, agent))
    }

    /// Cancel every branch the session dispatched.
    pub fn shutdown(&self) {
        self.branches.shutdown();
    }

    /// Round-robin over unflagged members, preferring members that declare the
    /// task's required capabilities. Falls back to the whole team when every
    /// member is flagged.
    fn assign_agent(&self, task: &ExecutionTask) -> Option<AgentId> {
        let state = self.state.read();
        let team = state.team.as_ref().filter(|t| !t.is_empty())?;

        let mut pool: Vec<&AgentProfile> = team
            .members
            .iter()
            .filter(|m| !state.flagged_agents.contains(&m.id))
            .collect();
        if pool.is_empty() {
            pool = team.members.iter().collect();
        }
        let capable: Vec<&AgentProfile> = pool
            .iter()
            .copied()
            .filter(|m| task.required_capabilities.iter().all(|c| m.has_capability(c)))
            .collect();
        if !capable.is_empty() {
            pool = capable;
        }

        let index = self.next_agent.fetch_add(1, Ordering::Relaxed) % pool.len();
        Some(pool[index].id)
    }

    async fn persist(&self) {
        let state = self.state();
        if let Err(e) = self.repository.save_state(&state).await {
            warn!(swarm_id = %state.id, error = %e, "Failed to persist swarm state");
        }
        let metrics = SwarmMetrics {
            swarm_id: state.id,
            strategies: self.branches.performance().all(),
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.repository.save_metrics(&metrics).await {
            warn!(swarm_id = %state.id, error = %e, "Failed to persist swarm metrics");
        }
    }
}
