// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Usage Tracker
//
// Samples how hard the shared resources are being driven (lease wait, slot
// occupancy, strategy latency) and mirrors them to the `metrics` facade.
// A CapacityPolicy turns a snapshot into the pool's effective capacity.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

use crate::domain::strategy::StrategyKind;

/// Smoothing factor for the exponentially weighted averages.
const EWMA_ALPHA: f64 = 0.2;

fn ewma(previous: Option<f64>, sample: f64) -> f64 {
    match previous {
        Some(prev) => EWMA_ALPHA * sample + (1.0 - EWMA_ALPHA) * prev,
        None => sample,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageSnapshot {
    pub in_use: usize,
    pub capacity: usize,
    pub peak_in_use: usize,
    pub lease_wait_ewma_ms: Option<f64>,
    pub latency_ewma_ms: Option<f64>,
    pub strategy_latency_ewma_ms: HashMap<StrategyKind, f64>,
    pub attempts: u64,
    pub failed_attempts: u64,
    pub lease_timeouts: u64,
    pub rate_limited: u64,
}

impl UsageSnapshot {
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.in_use as f64 / self.capacity as f64
        }
    }
}

#[derive(Default)]
pub struct UsageTracker {
    state: Mutex<UsageSnapshot>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_lease_wait(&self, waited: Duration) {
        let ms = waited.as_secs_f64() * 1000.0;
        let mut state = self.state.lock();
        state.lease_wait_ewma_ms = Some(ewma(state.lease_wait_ewma_ms, ms));
        metrics::histogram!("talon_lease_wait_ms").record(ms);
    }

    pub fn record_lease_timeout(&self) {
        self.state.lock().lease_timeouts += 1;
        metrics::counter!("talon_lease_timeouts_total").increment(1);
    }

    pub fn record_rate_limited(&self) {
        self.state.lock().rate_limited += 1;
        metrics::counter!("talon_rate_limited_total").increment(1);
    }

    pub fn record_occupancy(&self, in_use: usize, capacity: usize) {
        let mut state = self.state.lock();
        state.in_use = in_use;
        state.capacity = capacity;
        state.peak_in_use = state.peak_in_use.max(in_use);
        metrics::gauge!("talon_pool_in_use").set(in_use as f64);
        metrics::gauge!("talon_pool_capacity").set(capacity as f64);
    }

    pub fn record_attempt(&self, strategy: StrategyKind, latency: Duration, success: bool) {
        let ms = latency.as_secs_f64() * 1000.0;
        let mut state = self.state.lock();
        state.attempts += 1;
        if !success {
            state.failed_attempts += 1;
        }
        state.latency_ewma_ms = Some(ewma(state.latency_ewma_ms, ms));
        let previous = state.strategy_latency_ewma_ms.get(&strategy).copied();
        state.strategy_latency_ewma_ms.insert(strategy, ewma(previous, ms));
        drop(state);

        let outcome = if success { "success" } else { "failure" };
        metrics::counter!("talon_attempts_total", "strategy" => strategy.as_str(), "outcome" => outcome)
            .increment(1);
        metrics::histogram!("talon_attempt_latency_ms", "strategy" => strategy.as_str()).record(ms);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        self.state.lock().clone()
    }
}

/// Computes how many pool slots may be in use given recent usage.
pub trait CapacityPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Effective capacity in `1..=max_capacity`.
    fn effective_capacity(&self, max_capacity: usize, usage: &UsageSnapshot) -> usize;
}

/// Always the configured capacity.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedCapacity;

impl CapacityPolicy for FixedCapacity {
    fn name(&self) -> &str {
        "fixed"
    }

    fn effective_capacity(&self, max_capacity: usize, _usage: &UsageSnapshot) -> usize {
        max_capacity.max(1)
    }
}

/// Shrinks capacity in proportion to how far strategy latency overshoots a target.
#[derive(Debug, Clone, Copy)]
pub struct LatencyBackoffPolicy {
    pub target_latency_ms: f64,
    pub min_capacity: usize,
}

impl LatencyBackoffPolicy {
    pub fn new(target_latency: Duration, min_capacity: usize) -> Self {
        Self {
            target_latency_ms: target_latency.as_secs_f64() * 1000.0,
            min_capacity: min_capacity.max(1),
        }
    }
}

impl CapacityPolicy for LatencyBackoffPolicy {
    fn name(&self) -> &str {
        "latency_backoff"
    }

    fn effective_capacity(&self, max_capacity: usize, usage: &UsageSnapshot) -> usize {
        let max_capacity = max_capacity.max(1);
        let floor = self.min_capacity.min(max_capacity);
        match usage.latency_ewma_ms {
            Some(latency) if latency > self.target_latency_ms && self.target_latency_ms > 0.0 => {
                let scaled = (max_capacity as f64 * self.target_latency_ms / latency).floor() as usize;
                scaled.clamp(floor, max_capacity)
            }
            _ => max_capacity,
        }
    }
}
