// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Strategy Selection
//!
//! Scores candidate strategies as `weight × success_rate`, using the tracker's
//! prior for strategies without samples. Ties go to the lower mean latency,
//! then to declaration order.

use serde::{Deserialize, Serialize};

use talon_core::domain::performance::PerformanceMetrics;
use talon_core::domain::strategy::StrategyKind;

const SCORE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyScore {
    pub strategy: StrategyKind,
    pub weight: f64,
    pub success_rate: f64,
    pub mean_latency_ms: f64,
    pub samples: usize,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySelection {
    pub strategy: StrategyKind,
    /// Winning score clamped to `[0, 1]`.
    pub confidence: f64,
    pub scores: Vec<StrategyScore>,
}

/// Rank `candidates` (already in declaration order). `None` when empty.
pub fn rank(
    candidates: &[StrategyKind],
    weight: impl Fn(StrategyKind) -> f64,
    metrics: impl Fn(StrategyKind) -> PerformanceMetrics,
) -> Option<StrategySelection> {
    let scores: Vec<StrategyScore> = candidates
        .iter()
        .map(|&strategy| {
            let m = metrics(strategy);
            let weight = weight(strategy).max(0.0);
            let success_rate = m.success_rate();
            StrategyScore {
                strategy,
                weight,
                success_rate,
                mean_latency_ms: m.mean_latency_ms,
                samples: m.samples,
                score: weight * success_rate,
            }
        })
        .collect();

    let mut best: Option<&StrategyScore> = None;
    for candidate in &scores {
        best = match best {
            None => Some(candidate),
            Some(current) if beats(candidate, current) => Some(candidate),
            keep => keep,
        };
    }

    let best = best.copied()?;
    Some(StrategySelection {
        strategy: best.strategy,
        confidence: best.score.clamp(0.0, 1.0),
        scores,
    })
}

fn beats(candidate: &StrategyScore, current: &StrategyScore) -> bool {
    if candidate.score > current.score + SCORE_EPSILON {
        return true;
    }
    (candidate.score - current.score).abs() <= SCORE_EPSILON
        && candidate.mean_latency_ms < current.mean_latency_ms
}
