// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Team formation
//
// Agents are grouped by the capabilities they declare. Required capabilities
// are covered first; remaining seats go to agents adding the most capabilities
// the team does not have yet. Ties keep the caller's order.

use std::collections::BTreeSet;

use talon_core::domain::agent::AgentProfile;
use talon_core::domain::config::TeamConfig;
use talon_core::domain::error::OrchestratorError;

use crate::domain::swarm::SwarmTeam;

pub fn form_team(config: &TeamConfig, agents: &[AgentProfile]) -> Result<SwarmTeam, OrchestratorError> {
    let mut seen = BTreeSet::new();
    let eligible: Vec<&AgentProfile> = agents
        .iter()
        .filter(|a| !a.capabilities.is_empty() && seen.insert(a.id))
        .collect();

    if eligible.len() < config.min_size {
        return Err(OrchestratorError::Config(format!(
            "team needs at least {} agents with declared capabilities, {} available",
            config.min_size,
            eligible.len()
        )));
    }
    if let Some(missing) = config
        .required_capabilities
        .iter()
        .find(|cap| !eligible.iter().any(|a| a.has_capability(cap)))
    {
        return Err(OrchestratorError::Config(format!(
            "no agent declares required capability '{}'",
            missing
        )));
    }

    let mut selected: Vec<&AgentProfile> = Vec::new();
    let mut remaining = eligible;
    let mut uncovered: BTreeSet<&str> = config.required_capabilities.iter().map(String::as_str).collect();

    while !uncovered.is_empty() {
        let Some(index) = best_by(&remaining, |a| {
            a.capabilities.iter().filter(|c| uncovered.contains(c.as_str())).count()
        }) else {
            break;
        };
        let agent = remaining.remove(index);
        for capability in &agent.capabilities {
            uncovered.remove(capability.as_str());
        }
        selected.push(agent);
    }

    if selected.len() > config.max_size {
        return Err(OrchestratorError::Config(format!(
            "required capabilities need {} agents but team.maxSize is {}",
            selected.len(),
            config.max_size
        )));
    }

    while selected.len() < config.max_size && !remaining.is_empty() {
        let covered: BTreeSet<&str> = selected
            .iter()
            .flat_map(|a| a.capabilities.iter().map(String::as_str))
            .collect();
        let index = best_by(&remaining, |a| {
            a.capabilities.iter().filter(|c| !covered.contains(c.as_str())).count()
        })
        .unwrap_or(0);
        selected.push(remaining.remove(index));
    }

    Ok(SwarmTeam::new(selected.into_iter().cloned().collect()))
}

/// Index of the first agent with the highest positive gain.
fn best_by(agents: &[&AgentProfile], gain: impl Fn(&AgentProfile) -> usize) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for (index, agent) in agents.iter().enumerate() {
        let g = gain(agent);
        if g > 0 && best.map_or(true, |(_, b)| g > b) {
            best = Some((index, g));
        }
    }
    best.map(|(index, _)| index)
}
