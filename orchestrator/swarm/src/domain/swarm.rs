// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Domain Aggregates
//!
//! Defines the session state owned by the swarm coordinator:
//!
//! - [`SwarmState`]: aggregate root: decision log, team, agent assignments,
//!   strategy weights and demotions.
//! - [`SwarmTeam`]: agents grouped by declared capability.
//! - [`SwarmDecision`]: one strategy choice, appended and never mutated.
//! - [`ReflectionReport`]: what a reflection pass changed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use talon_core::domain::agent::{AgentId, AgentProfile};
use talon_core::domain::performance::PerformanceMetrics;
use talon_core::domain::strategy::StrategyKind;
use talon_core::domain::task::TaskId;

/// Unique identifier for a swarm session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SwarmId(pub Uuid);

impl SwarmId {
    /// Generate a new random `SwarmId`.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SwarmId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SwarmId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Agents selected for a session, with the capabilities each one covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmTeam {
    pub members: Vec<AgentProfile>,
    /// Capability -> members declaring it.
    pub coverage: BTreeMap<String, Vec<AgentId>>,
    pub formed_at: DateTime<Utc>,
}

impl SwarmTeam {
    pub fn new(members: Vec<AgentProfile>) -> Self {
        let mut coverage: BTreeMap<String, Vec<AgentId>> = BTreeMap::new();
        for member in &members {
            for capability in &member.capabilities {
                coverage.entry(capability.clone()).or_default().push(member.id);
            }
        }
        Self {
            members,
            coverage,
            formed_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, agent: AgentId) -> bool {
        self.members.iter().any(|m| m.id == agent)
    }

    pub fn covers(&self, capability: &str) -> bool {
        self.coverage.contains_key(capability)
    }
}

/// A strategy choice for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmDecision {
    pub task_id: TaskId,
    pub chosen_strategy: StrategyKind,
    pub confidence: f64,
    pub agent: Option<AgentId>,
    pub timestamp: DateTime<Utc>,
}

impl SwarmDecision {
    pub fn new(task_id: TaskId, chosen_strategy: StrategyKind, confidence: f64) -> Self {
        Self {
            task_id,
            chosen_strategy,
            confidence,
            agent: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_agent(mut self, agent: Option<AgentId>) -> Self {
        self.agent = agent;
        self
    }
}

/// A strategy whose selection weight was lowered by reflection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Demotion {
    /// Weight before the first demotion; restored on promotion.
    pub base_weight: f64,
    /// Failures at or before this instant have already been acted on.
    pub demoted_at: DateTime<Utc>,
}

/// Session state. Written only by the swarm coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmState {
    pub id: SwarmId,
    pub decisions: Vec<SwarmDecision>,
    pub team: Option<SwarmTeam>,
    /// Task -> agent it was assigned to.
    pub assignments: BTreeMap<TaskId, AgentId>,
    pub weights: BTreeMap<StrategyKind, f64>,
    pub demotions: BTreeMap<StrategyKind, Demotion>,
    /// Agents excluded from assignment after repeated failures.
    pub flagged_agents: BTreeSet<AgentId>,
    pub reflections: u64,
    pub updated_at: DateTime<Utc>,
}

impl SwarmState {
    pub fn new(weights: BTreeMap<StrategyKind, f64>) -> Self {
        Self {
            id: SwarmId::new(),
            decisions: Vec::new(),
            team: None,
            assignments: BTreeMap::new(),
            weights,
            demotions: BTreeMap::new(),
            flagged_agents: BTreeSet::new(),
            reflections: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn weight(&self, strategy: StrategyKind) -> f64 {
        self.weights.get(&strategy).copied().unwrap_or(1.0)
    }

    pub fn is_demoted(&self, strategy: StrategyKind) -> bool {
        self.demotions.contains_key(&strategy)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Result of one reflection pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionReport {
    pub demoted: Vec<StrategyKind>,
    pub restored: Vec<StrategyKind>,
    pub flagged_agents: Vec<AgentId>,
    pub cleared_agents: Vec<AgentId>,
    pub weights: BTreeMap<StrategyKind, f64>,
    pub generated_at: DateTime<Utc>,
}

impl ReflectionReport {
    pub fn changed(&self) -> bool {
        !(self.demoted.is_empty()
            && self.restored.is_empty()
            && self.flagged_agents.is_empty()
            && self.cleared_agents.is_empty())
    }
}

/// What is persisted alongside the state: the tracker's aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmMetrics {
    pub swarm_id: SwarmId,
    pub strategies: Vec<PerformanceMetrics>,
    pub recorded_at: DateTime<Utc>,
}
