// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::agent::AgentId;
use crate::domain::branch::{BranchId, BranchState};
use crate::domain::strategy::StrategyKind;
use crate::domain::task::TaskId;

/// State transition kinds published on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchEventType {
    Dispatched,
    Running,
    Retrying,
    Succeeded,
    Failed,
    Aborted,
}

impl From<BranchState> for BranchEventType {
    fn from(state: BranchState) -> Self {
        match state {
            BranchState::Pending => Self::Dispatched,
            BranchState::Running => Self::Running,
            BranchState::Retrying => Self::Retrying,
            BranchState::Succeeded => Self::Succeeded,
            BranchState::Failed => Self::Failed,
            BranchState::Aborted => Self::Aborted,
        }
    }
}

/// One branch state transition, as seen by event-stream subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchEvent {
    pub branch_id: BranchId,
    pub task_id: TaskId,
    pub parent_id: Option<BranchId>,
    #[serde(rename = "type")]
    pub event_type: BranchEventType,
    pub strategy: StrategyKind,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryCategory {
    Dispatched,
    AttemptSucceeded,
    AttemptFailed,
    Succeeded,
    Failed,
    Aborted,
    Rejected,
}

impl HistoryCategory {
    /// Categories counted as a strategy failure by pattern queries.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::AttemptFailed | Self::Failed)
    }

    /// Categories counted as a strategy success by pattern queries.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::AttemptSucceeded | Self::Succeeded)
    }
}

/// Immutable record appended to the rolling history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub category: HistoryCategory,
    pub branch_id: BranchId,
    pub strategy: StrategyKind,
    pub agent: Option<AgentId>,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

impl HistoryEvent {
    pub fn new(category: HistoryCategory, branch_id: BranchId, strategy: StrategyKind) -> Self {
        Self {
            category,
            branch_id,
            strategy,
            agent: None,
            timestamp: Utc::now(),
            payload: Value::Null,
        }
    }

    pub fn with_agent(mut self, agent: Option<AgentId>) -> Self {
        self.agent = agent;
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}
