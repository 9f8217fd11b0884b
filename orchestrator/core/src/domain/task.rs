// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Execution Task
//!
//! An [`ExecutionTask`] is the unit of work submitted to the orchestrator. It is
//! created at submission and is immutable afterwards, with one exception: the
//! attempt counter, which only the branch coordinator advances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::strategy::StrategyKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority. Higher values are admitted first when the pool is contended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Priority(pub u8);

impl Priority {
    pub const LOW: Priority = Priority(0);
    pub const NORMAL: Priority = Priority(50);
    pub const HIGH: Priority = Priority(100);
}

/// Declared shape of a task, used to filter compatible strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFeatures {
    /// Task needs to talk to something outside the process.
    #[serde(default)]
    pub external_io: bool,
    /// Task is a dialogue with an external agent.
    #[serde(default)]
    pub multi_turn: bool,
    /// Task can be split into sub-tasks.
    #[serde(default)]
    pub decomposable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionTask {
    #[serde(default)]
    pub id: TaskId,
    pub payload: Value,
    #[serde(default)]
    pub strategy_hint: Option<StrategyKind>,
    #[serde(default = "default_priority")]
    pub priority: Priority,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub features: TaskFeatures,
    #[serde(default, skip_deserializing)]
    attempt_count: u32,
}

fn default_priority() -> Priority {
    Priority::NORMAL
}

impl ExecutionTask {
    pub fn new(payload: Value) -> Self {
        Self {
            id: TaskId::new(),
            payload,
            strategy_hint: None,
            priority: Priority::NORMAL,
            deadline: None,
            required_capabilities: Vec::new(),
            features: TaskFeatures::default(),
            attempt_count: 0,
        }
    }

    pub fn with_hint(mut self, hint: StrategyKind) -> Self {
        self.strategy_hint = Some(hint);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_features(mut self, features: TaskFeatures) -> Self {
        self.features = features;
        self
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Advance the attempt counter. Crate-private: only the branch coordinator
    /// may call this.
    pub(crate) fn begin_attempt(&mut self) -> u32 {
        self.attempt_count += 1;
        self.attempt_count
    }
}
