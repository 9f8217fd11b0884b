// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};

use crate::domain::strategy::StrategyKind;

/// Success rate assumed for a strategy with no recorded samples.
pub const PRIOR_SUCCESS_RATE: f64 = 0.5;

/// Rolling per-strategy aggregates used to score strategies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub strategy: StrategyKind,
    pub samples: usize,
    pub successes: usize,
    pub mean_latency_ms: f64,
}

impl PerformanceMetrics {
    pub fn empty(strategy: StrategyKind) -> Self {
        Self {
            strategy,
            samples: 0,
            successes: 0,
            mean_latency_ms: 0.0,
        }
    }

    /// Observed success rate, or the prior when nothing has been observed yet.
    pub fn success_rate(&self) -> f64 {
        if self.samples == 0 {
            PRIOR_SUCCESS_RATE
        } else {
            self.successes as f64 / self.samples as f64
        }
    }
}

/// One observed attempt outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceEntry {
    pub success: bool,
    pub latency_ms: u64,
}
