// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Rolling History
//!
//! Bounded, time-windowed log of [`HistoryEvent`]s. The oldest events are
//! evicted once `max_events` is reached or when they fall out of `window`.
//! Queries look back over an arbitrary window no larger than the retained one.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::time::Duration;

use crate::domain::agent::AgentId;
use crate::domain::events::{HistoryCategory, HistoryEvent};
use crate::domain::strategy::StrategyKind;

/// Filter for [`RollingHistory::matches`]. Unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct HistoryPattern {
    pub categories: Vec<HistoryCategory>,
    pub strategy: Option<StrategyKind>,
    pub agent: Option<AgentId>,
    pub within: Option<Duration>,
}

impl HistoryPattern {
    pub fn failures_of(strategy: StrategyKind, within: Duration) -> Self {
        Self {
            categories: vec![HistoryCategory::AttemptFailed],
            strategy: Some(strategy),
            agent: None,
            within: Some(within),
        }
    }

    fn accepts(&self, event: &HistoryEvent, cutoff: Option<DateTime<Utc>>) -> bool {
        (self.categories.is_empty() || self.categories.contains(&event.category))
            && self.strategy.map_or(true, |s| s == event.strategy)
            && self.agent.map_or(true, |a| event.agent == Some(a))
            && cutoff.map_or(true, |c| event.timestamp >= c)
    }
}

pub struct RollingHistory {
    max_events: usize,
    window: Duration,
    events: RwLock<VecDeque<HistoryEvent>>,
}

impl RollingHistory {
    pub fn new(max_events: usize, window: Duration) -> Self {
        Self {
            max_events: max_events.max(1),
            window,
            events: RwLock::new(VecDeque::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn append(&self, event: HistoryEvent) {
        let mut events = self.events.write();
        events.push_back(event);
        while events.len() > self.max_events {
            events.pop_front();
        }
        Self::evict_expired(&mut events, self.window);
    }

    fn evict_expired(events: &mut VecDeque<HistoryEvent>, window: Duration) {
        let Some(cutoff) = cutoff(window) else {
            return;
        };
        while events.front().is_some_and(|e| e.timestamp < cutoff) {
            events.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Failed attempts of `strategy` within the last `window`.
    pub fn failures_within(&self, strategy: StrategyKind, window: Duration) -> usize {
        self.count(&HistoryPattern::failures_of(strategy, window))
    }

    /// Failed attempts attributed to `agent` within the last `window`.
    pub fn agent_failures_within(&self, agent: AgentId, window: Duration) -> usize {
        self.count(&HistoryPattern {
            categories: vec![HistoryCategory::AttemptFailed],
            strategy: None,
            agent: Some(agent),
            within: Some(window),
        })
    }

    /// Consecutive most-recent attempt failures of `strategy`.
    pub fn failure_streak(&self, strategy: StrategyKind) -> usize {
        self.streak(strategy, |c| c == HistoryCategory::AttemptFailed, |c| {
            c == HistoryCategory::AttemptSucceeded
        })
    }

    /// Consecutive most-recent attempt successes of `strategy`.
    pub fn clean_streak(&self, strategy: StrategyKind) -> usize {
        self.streak(strategy, |c| c == HistoryCategory::AttemptSucceeded, |c| {
            c == HistoryCategory::AttemptFailed
        })
    }

    fn streak(
        &self,
        strategy: StrategyKind,
        counts: impl Fn(HistoryCategory) -> bool,
        breaks: impl Fn(HistoryCategory) -> bool,
    ) -> usize {
        let events = self.events.read();
        let mut streak = 0;
        for event in events.iter().rev().filter(|e| e.strategy == strategy) {
            if counts(event.category) {
                streak += 1;
            } else if breaks(event.category) {
                break;
            }
        }
        streak
    }

    pub fn count(&self, pattern: &HistoryPattern) -> usize {
        let cutoff = pattern.within.and_then(cutoff);
        self.events
            .read()
            .iter()
            .filter(|e| pattern.accepts(e, cutoff))
            .count()
    }

    /// All retained events matching `pattern`, oldest first.
    pub fn matches(&self, pattern: &HistoryPattern) -> Vec<HistoryEvent> {
        let cutoff = pattern.within.and_then(cutoff);
        self.events
            .read()
            .iter()
            .filter(|e| pattern.accepts(e, cutoff))
            .cloned()
            .collect()
    }

    pub fn recent(&self, n: usize) -> Vec<HistoryEvent> {
        let events = self.events.read();
        events.iter().skip(events.len().saturating_sub(n)).cloned().collect()
    }
}

fn cutoff(window: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| Utc::now().checked_sub_signed(w))
}
