// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared fixtures for the coordinator integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use talon_core::application::strategies::StrategyFactory;
use talon_core::application::BranchCoordinator;
use talon_core::domain::config::SwarmConfig;
use talon_core::domain::strategy::{
    StrategyContext, StrategyExecutor, StrategyKind, StrategyResult,
};
use talon_core::domain::task::{ExecutionTask, TaskFeatures};

/// Strategy that replays a script of results, then succeeds.
pub struct ScriptedStrategy {
    kind: StrategyKind,
    idempotent: bool,
    delay: Duration,
    script: Mutex<VecDeque<StrategyResult>>,
    invocations: AtomicU32,
    starts: Mutex<Vec<Instant>>,
}

impl ScriptedStrategy {
    pub fn new(kind: StrategyKind) -> Self {
        Self {
            kind,
            idempotent: true,
            delay: Duration::ZERO,
            script: Mutex::new(VecDeque::new()),
            invocations: AtomicU32::new(0),
            starts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_script(self, script: Vec<StrategyResult>) -> Self {
        *self.script.lock() = script.into();
        self
    }

    pub fn non_idempotent(mut self) -> Self {
        self.idempotent = false;
        self
    }

    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> Vec<Instant> {
        self.starts.lock().clone()
    }
}

#[async_trait]
impl StrategyExecutor for ScriptedStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    fn is_idempotent(&self) -> bool {
        self.idempotent
    }

    fn supports(&self, _features: &TaskFeatures) -> bool {
        true
    }

    async fn execute(&self, task: &ExecutionTask, _context: &mut StrategyContext) -> StrategyResult {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.starts.lock().push(Instant::now());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| StrategyResult::success(json!({ "echo": task.payload })))
    }
}

pub fn coordinator_with(config: SwarmConfig, strategies: Vec<Arc<dyn StrategyExecutor>>) -> BranchCoordinator {
    let mut factory = StrategyFactory::new();
    for strategy in strategies {
        factory.register(strategy);
    }
    BranchCoordinator::new(&config, factory)
}

pub fn task() -> ExecutionTask {
    ExecutionTask::new(json!({ "op": "noop" }))
}
