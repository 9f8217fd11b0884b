// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Circuit Breaker
//!
//! Guards dispatch against a failing downstream.
//!
//! ```text
//! Closed ──(failures ≥ threshold and rate ≥ min)──► Open
//!   ▲                                                │ cooldown
//!   │ probe ok                                       ▼
//!   └─────────────────────────────────────────── HalfOpen ──probe failed──► Open
//! ```
//!
//! While HalfOpen exactly one probe is admitted. Dropping an unrecorded probe
//! permit frees the slot for the next caller without changing state.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::domain::config::CircuitBreakerConfig;
use crate::domain::error::OrchestratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerState {
    state: CircuitState,
    samples: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

struct BreakerInner {
    name: String,
    failure_threshold: usize,
    window: Duration,
    cooldown: Duration,
    min_failure_rate: f64,
    state: Mutex<BreakerState>,
}

impl BreakerInner {
    fn prune(&self, state: &mut BreakerState, now: Instant) {
        while state
            .samples
            .front()
            .is_some_and(|(at, _)| now.duration_since(*at) > self.window)
        {
            state.samples.pop_front();
        }
    }

    fn open(&self, state: &mut BreakerState, now: Instant) {
        state.state = CircuitState::Open;
        state.opened_at = Some(now);
        state.probe_in_flight = false;
        metrics::counter!("talon_circuit_opened_total", "breaker" => self.name.clone()).increment(1);
    }

    fn record(&self, success: bool, probe: bool) {
        let now = Instant::now();
        let mut state = self.state.lock();

        if probe && state.state == CircuitState::HalfOpen {
            state.probe_in_flight = false;
            if success {
                info!(breaker = %self.name, "Circuit closed after successful probe");
                state.state = CircuitState::Closed;
                state.opened_at = None;
                state.samples.clear();
            } else {
                warn!(breaker = %self.name, "Probe failed, circuit re-opened");
                self.open(&mut state, now);
            }
            return;
        }

        if state.state != CircuitState::Closed {
            // Late results from calls admitted before the circuit opened.
            return;
        }

        state.samples.push_back((now, success));
        self.prune(&mut state, now);

        let failures = state.samples.iter().filter(|(_, ok)| !ok).count();
        let rate = failures as f64 / state.samples.len() as f64;
        if failures >= self.failure_threshold && rate >= self.min_failure_rate {
            warn!(
                breaker = %self.name,
                failures,
                rate,
                "Failure threshold reached, circuit opened"
            );
            self.open(&mut state, now);
        }
    }

    fn release_probe(&self) {
        let mut state = self.state.lock();
        if state.state == CircuitState::HalfOpen {
            state.probe_in_flight = false;
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            inner: Arc::new(BreakerInner {
                name: name.into(),
                failure_threshold: config.failure_threshold.max(1) as usize,
                window: Duration::from_millis(config.window_ms),
                cooldown: Duration::from_millis(config.cooldown_ms),
                min_failure_rate: config.min_failure_rate,
                state: Mutex::new(BreakerState {
                    state: CircuitState::Closed,
                    samples: VecDeque::new(),
                    opened_at: None,
                    probe_in_flight: false,
                }),
            }),
        }
    }

    /// Ask to make one call. Fails with `CircuitOpen` while the circuit is open
    /// or a half-open probe is already out.
    pub fn try_acquire(&self) -> Result<CircuitPermit, OrchestratorError> {
        let now = Instant::now();
        let mut state = self.inner.state.lock();
        match state.state {
            CircuitState::Closed => Ok(self.permit(false)),
            CircuitState::Open => {
                let opened_at = state.opened_at.unwrap_or(now);
                let elapsed = now.duration_since(opened_at);
                if elapsed >= self.inner.cooldown {
                    info!(breaker = %self.inner.name, "Cooldown elapsed, admitting probe");
                    state.state = CircuitState::HalfOpen;
                    state.probe_in_flight = true;
                    Ok(self.permit(true))
                } else {
                    Err(OrchestratorError::CircuitOpen {
                        retry_after_ms: (self.inner.cooldown - elapsed).as_millis() as u64,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    Err(OrchestratorError::CircuitOpen { retry_after_ms: 0 })
                } else {
                    state.probe_in_flight = true;
                    Ok(self.permit(true))
                }
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.state.lock().state
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn permit(&self, probe: bool) -> CircuitPermit {
        CircuitPermit {
            inner: self.inner.clone(),
            probe,
            recorded: false,
        }
    }
}

/// Admission to make one call through the breaker.
pub struct CircuitPermit {
    inner: Arc<BreakerInner>,
    probe: bool,
    recorded: bool,
}

impl CircuitPermit {
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn record_success(mut self) {
        self.recorded = true;
        self.inner.record(true, self.probe);
    }

    pub fn record_failure(mut self) {
        self.recorded = true;
        self.inner.record(false, self.probe);
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if self.probe && !self.recorded {
            self.inner.release_probe();
        }
    }
}
