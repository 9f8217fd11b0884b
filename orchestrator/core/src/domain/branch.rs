// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Execution Branch Aggregate
//!
//! An [`ExecutionBranch`] is one coordinated run of a task: its attempts, its
//! retries, and (for Reasoning strategies) the ids of its child branches. It is
//! owned by the branch coordinator; callers see read-only snapshots.
//!
//! ## State Machine
//!
//! ```text
//! Pending ──► Running ──► Succeeded
//!    │          │  ▲
//!    │          ▼  │
//!    │       Retrying
//!    │          │
//!    └──────────┴──────► Failed | Aborted
//! ```
//!
//! Terminal states (`Succeeded`, `Failed`, `Aborted`) accept no further transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::error::{ErrorKind, OrchestratorError};
use crate::domain::strategy::{ConversationTurn, FailureClass, StrategyKind, StrategyOutcome, StrategyResult};
use crate::domain::task::{ExecutionTask, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchId(pub Uuid);

impl BranchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BranchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BranchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchState {
    Pending,
    Running,
    Retrying,
    Succeeded,
    Failed,
    Aborted,
}

impl BranchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }

    fn can_transition_to(&self, next: BranchState) -> bool {
        use BranchState::*;
        match (self, next) {
            (Pending, Running | Failed | Aborted) => true,
            (Running, Retrying | Succeeded | Failed | Aborted) => true,
            (Retrying, Running | Failed | Aborted) => true,
            _ => false,
        }
    }
}

/// What `BranchHandle::status()` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchStatus {
    pub state: BranchState,
    pub error_kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&OrchestratorError> for BranchError {
    fn from(err: &OrchestratorError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed { class: FailureClass, message: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub latency_ms: u64,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BranchTransitionError {
    #[error("illegal branch transition {from:?} -> {to:?}")]
    IllegalTransition { from: BranchState, to: BranchState },

    #[error("result for attempt {attempt} does not match the open attempt {open:?}")]
    AttemptMismatch { attempt: u32, open: Option<u32> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionBranch {
    pub id: BranchId,
    pub parent: Option<BranchId>,
    pub task: ExecutionTask,
    pub strategy: StrategyKind,
    pub state: BranchState,
    attempts: Vec<AttemptRecord>,
    open_attempt: Option<(u32, DateTime<Utc>)>,
    pub children: Vec<BranchId>,
    pub requeues: u32,
    pub error: Option<BranchError>,
    pub output: Option<Value>,
    pub conversation: Vec<ConversationTurn>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ExecutionBranch {
    pub fn new(task: ExecutionTask, strategy: StrategyKind, parent: Option<BranchId>) -> Self {
        Self {
            id: BranchId::new(),
            parent,
            task,
            strategy,
            state: BranchState::Pending,
            attempts: Vec::new(),
            open_attempt: None,
            children: Vec::new(),
            requeues: 0,
            error: None,
            output: None,
            conversation: Vec::new(),
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task.id
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    pub fn status(&self) -> BranchStatus {
        BranchStatus {
            state: self.state,
            error_kind: self.error.as_ref().map(|e| e.kind),
        }
    }

    pub fn transition(&mut self, next: BranchState) -> Result<(), BranchTransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(BranchTransitionError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Open a new attempt, advancing the task's attempt counter.
    pub fn begin_attempt(&mut self) -> u32 {
        let attempt = self.task.begin_attempt();
        self.open_attempt = Some((attempt, Utc::now()));
        attempt
    }

    /// Apply the result of the open attempt. A second result for the same
    /// attempt is rejected.
    pub fn apply_result(&mut self, result: &StrategyResult) -> Result<(), BranchTransitionError> {
        match self.open_attempt {
            Some((open, started_at)) if open == result.attempt => {
                let outcome = match &result.outcome {
                    StrategyOutcome::Success { .. } => AttemptOutcome::Succeeded,
                    StrategyOutcome::Failure { class, message } => AttemptOutcome::Failed {
                        class: *class,
                        message: message.clone(),
                    },
                };
                self.attempts.push(AttemptRecord {
                    attempt: open,
                    started_at,
                    latency_ms: result.latency.as_millis() as u64,
                    outcome,
                });
                self.open_attempt = None;
                Ok(())
            }
            open => Err(BranchTransitionError::AttemptMismatch {
                attempt: result.attempt,
                open: open.map(|(n, _)| n),
            }),
        }
    }

    /// Close the open attempt, if any, as cancelled.
    pub fn cancel_open_attempt(&mut self) {
        if let Some((attempt, started_at)) = self.open_attempt.take() {
            let latency_ms = (Utc::now() - started_at).num_milliseconds().max(0) as u64;
            self.attempts.push(AttemptRecord {
                attempt,
                started_at,
                latency_ms,
                outcome: AttemptOutcome::Cancelled,
            });
        }
    }

    pub fn fail(&mut self, error: &OrchestratorError) -> Result<(), BranchTransitionError> {
        self.transition(BranchState::Failed)?;
        self.error = Some(BranchError::from(error));
        Ok(())
    }
}

/// Terminal result of a branch, returned by `BranchHandle::wait()`.
#[derive(Debug, Clone)]
pub struct BranchOutcome {
    pub branch_id: BranchId,
    pub task_id: TaskId,
    pub state: BranchState,
    pub output: Option<Value>,
    pub error: Option<OrchestratorError>,
    pub attempts: u32,
}

impl BranchOutcome {
    pub fn is_success(&self) -> bool {
        self.state == BranchState::Succeeded
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(OrchestratorError::kind)
    }
}
