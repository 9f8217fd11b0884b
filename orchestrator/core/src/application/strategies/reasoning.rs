// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Reasoning Strategy
//!
//! Splits a task into sub-tasks with a [`Decomposer`], runs each one as a child
//! branch through the coordinator's [`ChildDispatcher`] (same pool, same rate
//! limiter, same retry policy), then folds the child outputs into one result.
//!
//! Children that already succeeded are remembered in the branch context, so a
//! retried attempt only re-runs the children that failed.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::branch::{BranchOutcome, BranchState};
use crate::domain::strategy::{
    ResourceUsage, StrategyContext, StrategyExecutor, StrategyKind, StrategyResult,
};
use crate::domain::task::{ExecutionTask, TaskFeatures};

/// How many children must succeed for the parent to succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialSuccess {
    AllOrNothing,
    AtLeast(usize),
}

impl PartialSuccess {
    pub fn is_satisfied(&self, succeeded: usize, total: usize) -> bool {
        match self {
            Self::AllOrNothing => succeeded == total,
            Self::AtLeast(n) => succeeded >= (*n).min(total),
        }
    }
}

impl Default for PartialSuccess {
    fn default() -> Self {
        Self::AllOrNothing
    }
}

#[derive(Debug, Clone)]
pub struct Subtask {
    pub task: ExecutionTask,
    pub strategy: StrategyKind,
}

pub trait Decomposer: Send + Sync {
    fn decompose(&self, task: &ExecutionTask) -> Result<Vec<Subtask>, String>;
}

/// Reads sub-tasks from `payload.subtasks`.
///
/// Each entry is either a bare payload or `{ "payload": ..., "strategy": ... }`.
/// Children inherit the parent's priority, deadline and capabilities.
#[derive(Debug, Clone, Copy)]
pub struct PayloadDecomposer {
    pub default_strategy: StrategyKind,
}

impl Default for PayloadDecomposer {
    fn default() -> Self {
        Self {
            default_strategy: StrategyKind::Deterministic,
        }
    }
}

impl Decomposer for PayloadDecomposer {
    fn decompose(&self, task: &ExecutionTask) -> Result<Vec<Subtask>, String> {
        let entries = task
            .payload
            .get("subtasks")
            .and_then(Value::as_array)
            .ok_or_else(|| "payload has no 'subtasks' array".to_string())?;

        entries
            .iter()
            .map(|entry| {
                let (payload, strategy) = match entry.get("payload") {
                    Some(payload) => {
                        let strategy = match entry.get("strategy").and_then(Value::as_str) {
                            Some(tag) => tag.parse::<StrategyKind>()?,
                            None => self.default_strategy,
                        };
                        (payload.clone(), strategy)
                    }
                    None => (entry.clone(), self.default_strategy),
                };

                let mut child = ExecutionTask::new(payload)
                    .with_priority(task.priority)
                    .with_capabilities(task.required_capabilities.clone());
                if let Some(deadline) = task.deadline {
                    child = child.with_deadline(deadline);
                }
                Ok(Subtask {
                    task: child,
                    strategy,
                })
            })
            .collect()
    }
}

pub struct ReasoningStrategy {
    decomposer: Arc<dyn Decomposer>,
    policy: PartialSuccess,
}

impl ReasoningStrategy {
    pub fn new(decomposer: Arc<dyn Decomposer>, policy: PartialSuccess) -> Self {
        Self { decomposer, policy }
    }

    fn scratch_key(index: usize) -> String {
        format!("child:{}", index)
    }
}

impl Default for ReasoningStrategy {
    fn default() -> Self {
        Self::new(Arc::new(PayloadDecomposer::default()), PartialSuccess::AllOrNothing)
    }
}

#[async_trait]
impl StrategyExecutor for ReasoningStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Reasoning
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    fn supports(&self, features: &TaskFeatures) -> bool {
        features.decomposable && !features.multi_turn
    }

    async fn execute(&self, task: &ExecutionTask, context: &mut StrategyContext) -> StrategyResult {
        let Some(dispatcher) = context.children().cloned() else {
            return StrategyResult::permanent("no child dispatcher available");
        };

        let subtasks = match self.decomposer.decompose(task) {
            Ok(subtasks) if subtasks.is_empty() => {
                return StrategyResult::permanent("decomposition produced no sub-tasks")
            }
            Ok(subtasks) => subtasks,
            Err(message) => return StrategyResult::permanent(format!("decomposition failed: {}", message)),
        };
        let total = subtasks.len();

        let pending: Vec<(usize, Subtask)> = subtasks
            .into_iter()
            .enumerate()
            .filter(|(index, _)| !context.scratch.contains_key(&Self::scratch_key(*index)))
            .collect();
        debug!(
            branch_id = %context.branch_id,
            total,
            pending = pending.len(),
            "Dispatching child branches"
        );

        let parent = context.branch_id;
        let dispatched = pending.len();
        let outcomes = join_all(pending.into_iter().map(|(index, subtask)| {
            let dispatcher = dispatcher.clone();
            let cancel = context.cancel.child_token();
            async move {
                let outcome = dispatcher
                    .dispatch_child(parent, subtask.task, subtask.strategy, cancel)
                    .await;
                (index, outcome)
            }
        }))
        .await;

        let mut failures = Vec::new();
        for (index, outcome) in outcomes {
            let BranchOutcome {
                branch_id,
                state,
                output,
                error,
                ..
            } = outcome;
            match (state, output) {
                (BranchState::Succeeded, Some(output)) => {
                    context.scratch.insert(Self::scratch_key(index), output);
                }
                _ => failures.push(json!({
                    "index": index,
                    "branchId": branch_id.to_string(),
                    "state": state,
                    "error": error.map(|e| e.to_string()),
                })),
            }
        }

        let results: Vec<Option<Value>> = (0..total)
            .map(|index| context.scratch.get(&Self::scratch_key(index)).cloned())
            .collect();
        let succeeded = results.iter().filter(|v| v.is_some()).count();
        let results: Vec<Value> = results.into_iter().map(|v| v.unwrap_or(Value::Null)).collect();
        let usage = ResourceUsage {
            external_calls: 0,
            units: dispatched as u64,
        };

        if self.policy.is_satisfied(succeeded, total) {
            info!(branch_id = %parent, succeeded, total, "Child branches aggregated");
            StrategyResult::success(json!({
                "results": results,
                "succeeded": succeeded,
                "failed": total - succeeded,
            }))
            .with_usage(usage)
        } else {
            StrategyResult::permanent(format!(
                "{} of {} child branches failed: {}",
                total - succeeded,
                total,
                Value::Array(failures)
            ))
            .with_usage(usage)
        }
    }
}
