// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Strategy Contract
//!
//! Every execution strategy implements [`StrategyExecutor`]. The branch
//! coordinator resolves an executor by its closed [`StrategyKind`] tag, hands it
//! the task plus a per-branch [`StrategyContext`], and classifies the returned
//! [`StrategyResult`].
//!
//! Strategies never touch leases, rate tokens or retries themselves. A
//! Reasoning strategy that needs child work goes back through the coordinator
//! via the [`ChildDispatcher`] carried in its context.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::domain::branch::{BranchId, BranchOutcome};
use crate::domain::task::{ExecutionTask, TaskFeatures};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Deterministic,
    Conversational,
    Reasoning,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::Deterministic,
        StrategyKind::Conversational,
        StrategyKind::Reasoning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
            Self::Conversational => "conversational",
            Self::Reasoning => "reasoning",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deterministic" => Ok(Self::Deterministic),
            "conversational" => Ok(Self::Conversational),
            "reasoning" => Ok(Self::Reasoning),
            other => Err(format!("unknown strategy tag '{}'", other)),
        }
    }
}

/// How a failed attempt should be treated by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Transient,
    Permanent,
    ResourceExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Downstream calls made during the attempt.
    pub external_calls: u32,
    /// Strategy-defined work units (tokens, rows, steps).
    pub units: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StrategyOutcome {
    Success { output: Value },
    Failure { class: FailureClass, message: String },
}

/// Outcome of exactly one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyResult {
    pub attempt: u32,
    pub outcome: StrategyOutcome,
    #[serde(with = "duration_millis")]
    pub latency: Duration,
    pub usage: ResourceUsage,
    /// The attempt left no partial side effect, so it is safe to repeat.
    pub idempotent: bool,
}

impl StrategyResult {
    pub fn success(output: Value) -> Self {
        Self {
            attempt: 0,
            outcome: StrategyOutcome::Success { output },
            latency: Duration::ZERO,
            usage: ResourceUsage::default(),
            idempotent: true,
        }
    }

    pub fn failure(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            attempt: 0,
            outcome: StrategyOutcome::Failure {
                class,
                message: message.into(),
            },
            latency: Duration::ZERO,
            usage: ResourceUsage::default(),
            idempotent: true,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::failure(FailureClass::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::failure(FailureClass::Permanent, message)
    }

    pub fn with_usage(mut self, usage: ResourceUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, StrategyOutcome::Success { .. })
    }

    pub fn failure_class(&self) -> Option<FailureClass> {
        match &self.outcome {
            StrategyOutcome::Failure { class, .. } => Some(*class),
            StrategyOutcome::Success { .. } => None,
        }
    }

    pub fn output(&self) -> Option<&Value> {
        match &self.outcome {
            StrategyOutcome::Success { output } => Some(output),
            StrategyOutcome::Failure { .. } => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match &self.outcome {
            StrategyOutcome::Failure { message, .. } => Some(message),
            StrategyOutcome::Success { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    Orchestrator,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: Value,
}

/// Dispatches child work for a strategy through the owning coordinator.
#[async_trait]
pub trait ChildDispatcher: Send + Sync {
    async fn dispatch_child(
        &self,
        parent: BranchId,
        task: ExecutionTask,
        strategy: StrategyKind,
        cancel: CancellationToken,
    ) -> BranchOutcome;
}

/// Per-branch state handed to a strategy on every attempt.
///
/// The context outlives individual attempts, which is how a conversational
/// strategy carries its dialogue across retries without mutating the task.
#[derive(Clone)]
pub struct StrategyContext {
    pub branch_id: BranchId,
    pub attempt: u32,
    pub depth: u32,
    pub cancel: CancellationToken,
    pub conversation: Vec<ConversationTurn>,
    pub scratch: HashMap<String, Value>,
    children: Option<Arc<dyn ChildDispatcher>>,
}

impl std::fmt::Debug for StrategyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyContext")
            .field("branch_id", &self.branch_id)
            .field("attempt", &self.attempt)
            .field("depth", &self.depth)
            .field("turns", &self.conversation.len())
            .finish()
    }
}

impl StrategyContext {
    pub fn new(branch_id: BranchId, cancel: CancellationToken) -> Self {
        Self {
            branch_id,
            attempt: 0,
            depth: 0,
            cancel,
            conversation: Vec::new(),
            scratch: HashMap::new(),
            children: None,
        }
    }

    pub fn with_children(mut self, dispatcher: Arc<dyn ChildDispatcher>, depth: u32) -> Self {
        self.children = Some(dispatcher);
        self.depth = depth;
        self
    }

    pub fn children(&self) -> Option<&Arc<dyn ChildDispatcher>> {
        self.children.as_ref()
    }
}

#[async_trait]
pub trait StrategyExecutor: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Whether a failed attempt can be repeated without risk of duplicated side effects.
    fn is_idempotent(&self) -> bool;

    /// Whether this strategy can run a task with the given features.
    fn supports(&self, features: &TaskFeatures) -> bool;

    async fn execute(&self, task: &ExecutionTask, context: &mut StrategyContext) -> StrategyResult;
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
