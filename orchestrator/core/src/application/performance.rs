// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::domain::performance::{PerformanceEntry, PerformanceMetrics};
use crate::domain::strategy::StrategyKind;

pub const DEFAULT_PERFORMANCE_WINDOW: usize = 50;

/// Rolling per-strategy outcome samples, one per strategy attempt.
pub struct PerformanceTracker {
    window: usize,
    samples: RwLock<HashMap<StrategyKind, VecDeque<PerformanceEntry>>>,
}

impl PerformanceTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            samples: RwLock::new(HashMap::new()),
        }
    }

    pub fn record(&self, strategy: StrategyKind, success: bool, latency: Duration) {
        let mut samples = self.samples.write();
        let entries = samples.entry(strategy).or_default();
        entries.push_back(PerformanceEntry {
            success,
            latency_ms: latency.as_millis() as u64,
        });
        while entries.len() > self.window {
            entries.pop_front();
        }
    }

    pub fn metrics(&self, strategy: StrategyKind) -> PerformanceMetrics {
        let samples = self.samples.read();
        let Some(entries) = samples.get(&strategy).filter(|e| !e.is_empty()) else {
            return PerformanceMetrics::empty(strategy);
        };
        let successes = entries.iter().filter(|e| e.success).count();
        let total_latency: u64 = entries.iter().map(|e| e.latency_ms).sum();
        PerformanceMetrics {
            strategy,
            samples: entries.len(),
            successes,
            mean_latency_ms: total_latency as f64 / entries.len() as f64,
        }
    }

    pub fn all(&self) -> Vec<PerformanceMetrics> {
        StrategyKind::ALL.iter().map(|k| self.metrics(*k)).collect()
    }

    /// Seed the tracker from previously persisted aggregates.
    pub fn restore(&self, metrics: &[PerformanceMetrics]) {
        let mut samples = self.samples.write();
        for m in metrics {
            let latency_ms = m.mean_latency_ms.max(0.0).round() as u64;
            let count = m.samples.min(self.window);
            let successes = m.successes.min(count);
            let entries: VecDeque<_> = (0..count)
                .map(|i| PerformanceEntry {
                    success: i < successes,
                    latency_ms,
                })
                .collect();
            samples.insert(m.strategy, entries);
        }
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_PERFORMANCE_WINDOW)
    }
}
