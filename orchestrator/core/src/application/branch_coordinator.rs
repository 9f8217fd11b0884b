// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Branch Coordinator
//!
//! Runs every task as an [`ExecutionBranch`] on its own tokio task and hands
//! the caller a [`BranchHandle`]. Per attempt the coordinator:
//!
//! 1. checks admission (capability policy) once, before anything is acquired;
//! 2. asks the circuit breaker for a permit;
//! 3. acquires a pool lease at the task's priority;
//! 4. acquires rate-limiter tokens;
//! 5. invokes the strategy, then releases tokens and lease;
//! 6. classifies the result: retry with backoff, requeue, or finish.
//!
//! Cancellation and the task deadline race the whole loop. Losing the race
//! drops the in-flight strategy call, backoff timer, lease and tokens, so every
//! resource is returned exactly once by its RAII guard.
//!
//! Every state transition is published on the [`EventBus`], every attempt is
//! recorded in the [`RollingHistory`], the [`PerformanceTracker`] and the
//! [`UsageTracker`].

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::backoff::RetryPolicy;
use crate::application::performance::PerformanceTracker;
use crate::application::strategies::StrategyFactory;
use crate::application::validation::{AdmissionValidator, SecurityValidator};
use crate::domain::agent::AgentId;
use crate::domain::branch::{BranchId, BranchOutcome, BranchState, BranchStatus, ExecutionBranch};
use crate::domain::config::SwarmConfig;
use crate::domain::error::OrchestratorError;
use crate::domain::events::{BranchEvent, BranchEventType, HistoryCategory, HistoryEvent};
use crate::domain::strategy::{
    ChildDispatcher, FailureClass, StrategyContext, StrategyExecutor, StrategyKind, StrategyOutcome,
    StrategyResult,
};
use crate::domain::task::{ExecutionTask, TaskId};
use crate::infrastructure::circuit_breaker::CircuitBreaker;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::rate_limiter::RateLimiter;
use crate::infrastructure::resource_pool::ResourcePool;
use crate::infrastructure::rolling_history::RollingHistory;
use crate::infrastructure::usage_tracker::{CapacityPolicy, FixedCapacity, UsageTracker};

/// Rate tokens taken per strategy invocation.
const TOKENS_PER_CALL: u32 = 1;

/// Why a branch stopped without succeeding.
enum BranchEnd {
    Failed(OrchestratorError),
    Aborted,
}

impl From<OrchestratorError> for BranchEnd {
    fn from(err: OrchestratorError) -> Self {
        BranchEnd::Failed(err)
    }
}

/// State shared between a running branch and its handles.
struct BranchShared {
    branch: RwLock<ExecutionBranch>,
    status: watch::Sender<BranchStatus>,
    outcome: Mutex<Option<BranchOutcome>>,
}

/// Caller's view of a dispatched branch.
#[derive(Clone)]
pub struct BranchHandle {
    id: BranchId,
    task_id: TaskId,
    shared: Arc<BranchShared>,
    cancel: CancellationToken,
}

impl BranchHandle {
    pub fn id(&self) -> BranchId {
        self.id
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn status(&self) -> BranchStatus {
        *self.shared.status.borrow()
    }

    /// Request cancellation. The branch and its children end `Aborted`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Read-only copy of the branch record.
    pub fn snapshot(&self) -> ExecutionBranch {
        self.shared.branch.read().clone()
    }

    /// Wait for the branch to reach a terminal state.
    pub async fn wait(&self) -> BranchOutcome {
        let mut rx = self.shared.status.subscribe();
        let _ = rx.wait_for(|status| status.state.is_terminal()).await;

        // The outcome is stored before the terminal status is published.
        let outcome = self.shared.outcome.lock().clone();
        outcome.unwrap_or_else(|| {
            let branch = self.snapshot();
            BranchOutcome {
                branch_id: self.id,
                task_id: self.task_id,
                state: branch.state,
                output: branch.output,
                error: Some(OrchestratorError::Permanent("branch outcome unavailable".into())),
                attempts: branch.task.attempt_count(),
            }
        })
    }
}

impl std::fmt::Debug for BranchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchHandle")
            .field("id", &self.id)
            .field("task_id", &self.task_id)
            .field("status", &self.status())
            .finish()
    }
}

struct CoordinatorInner {
    strategies: StrategyFactory,
    validator: Arc<dyn AdmissionValidator>,
    pool: ResourcePool,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    bus: EventBus,
    history: Arc<RollingHistory>,
    performance: Arc<PerformanceTracker>,
    usage: Arc<UsageTracker>,
    capacity_policy: Arc<dyn CapacityPolicy>,
    retry: RetryPolicy,
    max_requeues: u32,
    lease_timeout: Duration,
    max_depth: u32,
    shutdown: CancellationToken,
}

/// Dispatches tasks through strategies under pool, rate and breaker control.
#[derive(Clone)]
pub struct BranchCoordinator {
    inner: Arc<CoordinatorInner>,
}

/// Optional collaborators for [`BranchCoordinator`]; anything unset is built
/// from the config.
#[derive(Default)]
pub struct CoordinatorParts {
    pub event_bus: Option<EventBus>,
    pub history: Option<Arc<RollingHistory>>,
    pub performance: Option<Arc<PerformanceTracker>>,
    pub usage: Option<Arc<UsageTracker>>,
    pub validator: Option<Arc<dyn AdmissionValidator>>,
    pub capacity_policy: Option<Arc<dyn CapacityPolicy>>,
}

impl BranchCoordinator {
    pub fn new(config: &SwarmConfig, strategies: StrategyFactory) -> Self {
        Self::with_parts(config, strategies, CoordinatorParts::default())
    }

    pub fn with_parts(config: &SwarmConfig, strategies: StrategyFactory, parts: CoordinatorParts) -> Self {
        let inner = CoordinatorInner {
            strategies,
            validator: parts
                .validator
                .unwrap_or_else(|| Arc::new(SecurityValidator::new(config.security.clone()))),
            pool: ResourcePool::new(config.pool_capacity),
            limiter: RateLimiter::new(&config.rate_limit),
            breaker: CircuitBreaker::new("dispatch", &config.circuit_breaker),
            bus: parts
                .event_bus
                .unwrap_or_else(|| EventBus::new(config.event_bus_capacity)),
            history: parts.history.unwrap_or_else(|| {
                Arc::new(RollingHistory::new(config.history_capacity, config.history_window()))
            }),
            performance: parts.performance.unwrap_or_default(),
            usage: parts.usage.unwrap_or_default(),
            capacity_policy: parts.capacity_policy.unwrap_or_else(|| Arc::new(FixedCapacity)),
            retry: RetryPolicy::from_config(&config.retry),
            max_requeues: config.retry.max_requeues,
            lease_timeout: config.lease_timeout(),
            max_depth: config.max_depth,
            shutdown: CancellationToken::new(),
        };
        info!(
            pool_capacity = config.pool_capacity,
            strategies = ?inner.strategies.registered(),
            "Branch coordinator ready"
        );
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Dispatch `task` through `strategy`.
    pub fn dispatch(&self, task: ExecutionTask, strategy: StrategyKind) -> BranchHandle {
        self.dispatch_for_agent(task, strategy, None)
    }

    /// Dispatch on behalf of an agent; the agent is attributed in the history.
    pub fn dispatch_for_agent(
        &self,
        task: ExecutionTask,
        strategy: StrategyKind,
        agent: Option<AgentId>,
    ) -> BranchHandle {
        let cancel = self.inner.shutdown.child_token();
        self.spawn_branch(task, strategy, None, agent, 0, cancel)
    }

    /// Cancel every branch dispatched by this coordinator.
    pub fn shutdown(&self) {
        info!("Branch coordinator shutting down");
        self.inner.shutdown.cancel();
    }

    pub fn strategies(&self) -> &StrategyFactory {
        &self.inner.strategies
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.inner.pool
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn history(&self) -> &Arc<RollingHistory> {
        &self.inner.history
    }

    pub fn performance(&self) -> &Arc<PerformanceTracker> {
        &self.inner.performance
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.inner.usage
    }

    fn spawn_branch(
        &self,
        task: ExecutionTask,
        strategy: StrategyKind,
        parent: Option<BranchId>,
        agent: Option<AgentId>,
        depth: u32,
        cancel: CancellationToken,
    ) -> BranchHandle {
        let branch = ExecutionBranch::new(task, strategy, parent);
        let (status, _) = watch::channel(branch.status());
        let handle = BranchHandle {
            id: branch.id,
            task_id: branch.task_id(),
            shared: Arc::new(BranchShared {
                branch: RwLock::new(branch),
                status,
                outcome: Mutex::new(None),
            }),
            cancel: cancel.clone(),
        };

        let run = BranchRun {
            coordinator: self.clone(),
            shared: handle.shared.clone(),
            id: handle.id,
            strategy,
            parent,
            agent,
            depth,
            cancel,
        };
        tokio::spawn(run.run());
        handle
    }
}

/// One branch's execution, owned by its tokio task.
struct BranchRun {
    coordinator: BranchCoordinator,
    shared: Arc<BranchShared>,
    id: BranchId,
    strategy: StrategyKind,
    parent: Option<BranchId>,
    agent: Option<AgentId>,
    depth: u32,
    cancel: CancellationToken,
}

impl BranchRun {
    fn inner(&self) -> &CoordinatorInner {
        &self.coordinator.inner
    }

    async fn run(self) {
        let started = Instant::now();
        self.publish(BranchEventType::Dispatched, json!({ "depth": self.depth }));
        self.record_history(HistoryCategory::Dispatched, Value::Null);

        let deadline = self.shared.branch.read().task.deadline.map(|at| {
            let remaining = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            started + remaining
        });

        let result = {
            let attempts = self.attempt_loop();
            let bounded = async {
                match deadline {
                    Some(at) => match tokio::time::timeout_at(at, attempts).await {
                        Ok(result) => result,
                        Err(_) => Err(BranchEnd::Failed(OrchestratorError::Timeout {
                            resource: "task_deadline".to_string(),
                            waited_ms: started.elapsed().as_millis() as u64,
                        })),
                    },
                    None => attempts.await,
                }
            };
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(BranchEnd::Aborted),
                result = bounded => result,
            }
        };

        self.finish(result);
    }

    async fn attempt_loop(&self) -> Result<Value, BranchEnd> {
        let inner = self.inner();
        let task = self.shared.branch.read().task.clone();

        if let Err(violation) = inner.validator.validate(&task) {
            self.record_history(
                HistoryCategory::Rejected,
                json!({ "reason": violation.to_string() }),
            );
            return Err(OrchestratorError::from(violation).into());
        }

        if self.depth > inner.max_depth {
            return Err(OrchestratorError::Permanent(format!(
                "maximum reasoning depth {} exceeded",
                inner.max_depth
            ))
            .into());
        }

        let executor = inner.strategies.resolve(self.strategy)?;
        if !executor.supports(&task.features) {
            return Err(OrchestratorError::UnknownStrategy(format!(
                "strategy '{}' cannot run a task with features {:?}",
                self.strategy, task.features
            ))
            .into());
        }

        let mut context = StrategyContext::new(self.id, self.cancel.clone()).with_children(
            Arc::new(ChildScope {
                coordinator: self.coordinator.clone(),
                parent: self.shared.clone(),
                agent: self.agent,
                depth: self.depth + 1,
            }),
            self.depth,
        );

        let mut retry_index = 0u32;
        let mut requeues = 0u32;
        let mut unsafe_retries = 0u32;

        loop {
            let permit = inner.breaker.try_acquire()?;
            if permit.is_probe() {
                info!(branch_id = %self.id, "Dispatching as circuit probe");
            }

            let wait_started = Instant::now();
            let lease = match inner.pool.acquire(task.priority, inner.lease_timeout).await {
                Ok(lease) => lease,
                Err(e) => {
                    inner.usage.record_lease_timeout();
                    return Err(OrchestratorError::from(e).into());
                }
            };
            inner.usage.record_lease_wait(wait_started.elapsed());
            inner.usage.record_occupancy(inner.pool.in_use(), inner.pool.capacity());

            let tokens = match inner.limiter.acquire(TOKENS_PER_CALL, inner.lease_timeout).await {
                Ok(tokens) => tokens,
                Err(e) => {
                    inner.usage.record_rate_limited();
                    return Err(OrchestratorError::from(e).into());
                }
            };

            let (attempt, task) = {
                let mut branch = self.shared.branch.write();
                if let Err(e) = branch.transition(BranchState::Running) {
                    return Err(OrchestratorError::Permanent(e.to_string()).into());
                }
                let attempt = branch.begin_attempt();
                (attempt, branch.task.clone())
            };
            self.publish_status();
            self.publish(BranchEventType::Running, json!({ "attempt": attempt }));

            context.attempt = attempt;
            let call_started = Instant::now();
            let mut result = executor.execute(&task, &mut context).await;
            result.attempt = attempt;
            if result.latency.is_zero() {
                result.latency = call_started.elapsed();
            }

            tokens.commit();
            lease.release();
            inner.usage.record_occupancy(inner.pool.in_use(), inner.pool.capacity());

            self.record_attempt(&result, &context);
            if result.is_success() {
                permit.record_success();
            } else {
                permit.record_failure();
            }
            let effective = inner
                .capacity_policy
                .effective_capacity(inner.pool.max_capacity(), &inner.usage.snapshot());
            inner.pool.set_capacity(effective);

            let (class, message) = match result.outcome {
                StrategyOutcome::Success { output } => return Ok(output),
                StrategyOutcome::Failure { class, message } => (class, message),
            };

            match class {
                FailureClass::Permanent => return Err(OrchestratorError::Permanent(message).into()),
                FailureClass::Transient => {
                    if !inner.retry.allows_another(attempt) {
                        return Err(OrchestratorError::Exhausted {
                            attempts: attempt,
                            reason: message,
                        }
                        .into());
                    }
                    if !executor.is_idempotent() && !result.idempotent {
                        if unsafe_retries >= 1 {
                            return Err(OrchestratorError::Exhausted {
                                attempts: attempt,
                                reason: format!(
                                    "unsafe to retry non-idempotent strategy after partial side effect: {}",
                                    message
                                ),
                            }
                            .into());
                        }
                        unsafe_retries += 1;
                    }

                    let delay = inner.retry.delay(retry_index);
                    retry_index += 1;
                    self.enter_retrying(json!({
                        "attempt": attempt,
                        "delayMs": delay.as_millis() as u64,
                        "reason": message,
                    }))?;
                    debug!(branch_id = %self.id, attempt, ?delay, "Backing off before retry");
                    tokio::time::sleep(delay).await;
                }
                FailureClass::ResourceExhausted => {
                    if requeues >= inner.max_requeues {
                        return Err(OrchestratorError::Exhausted {
                            attempts: attempt,
                            reason: format!("requeue budget spent: {}", message),
                        }
                        .into());
                    }
                    // Backs off even when slots are free: the quota that ran
                    // out is downstream, not the pool.
                    let delay = inner.retry.delay(requeues);
                    requeues += 1;
                    self.shared.branch.write().requeues = requeues;
                    self.enter_retrying(json!({
                        "attempt": attempt,
                        "requeue": requeues,
                        "delayMs": delay.as_millis() as u64,
                        "reason": message,
                    }))?;
                    debug!(branch_id = %self.id, requeues, ?delay, "Requeueing after backoff");
                    tokio::time::sleep(delay).await;
                    inner.pool.wait_for_release(inner.lease_timeout).await;
                }
            }
        }
    }

    fn enter_retrying(&self, payload: Value) -> Result<(), BranchEnd> {
        if let Err(e) = self.shared.branch.write().transition(BranchState::Retrying) {
            return Err(OrchestratorError::Permanent(e.to_string()).into());
        }
        self.publish_status();
        self.publish(BranchEventType::Retrying, payload);
        Ok(())
    }

    fn record_attempt(&self, result: &StrategyResult, context: &StrategyContext) {
        let inner = self.inner();
        {
            let mut branch = self.shared.branch.write();
            if let Err(e) = branch.apply_result(result) {
                warn!(branch_id = %self.id, error = %e, "Discarded strategy result");
                return;
            }
            branch.conversation = context.conversation.clone();
        }

        let success = result.is_success();
        inner.performance.record(self.strategy, success, result.latency);
        inner.usage.record_attempt(self.strategy, result.latency, success);

        let (category, payload) = match &result.outcome {
            StrategyOutcome::Success { .. } => (
                HistoryCategory::AttemptSucceeded,
                json!({ "attempt": result.attempt, "latencyMs": result.latency.as_millis() as u64 }),
            ),
            StrategyOutcome::Failure { class, message } => (
                HistoryCategory::AttemptFailed,
                json!({
                    "attempt": result.attempt,
                    "class": class,
                    "message": message,
                    "latencyMs": result.latency.as_millis() as u64,
                }),
            ),
        };
        self.record_history(category, payload);
    }

    fn finish(&self, result: Result<Value, BranchEnd>) {
        let (event_type, category, payload, outcome) = {
            let mut branch = self.shared.branch.write();
            branch.cancel_open_attempt();

            let (target, error, output) = match result {
                Ok(output) => (BranchState::Succeeded, None, Some(output)),
                Err(BranchEnd::Failed(err)) => (BranchState::Failed, Some(err), None),
                Err(BranchEnd::Aborted) => (BranchState::Aborted, None, None),
            };

            let applied = match &error {
                Some(err) => branch.fail(err),
                None => branch.transition(target),
            };
            if let Err(e) = applied {
                warn!(branch_id = %self.id, error = %e, "Terminal transition rejected");
            }
            branch.output = output.clone();

            let outcome = BranchOutcome {
                branch_id: self.id,
                task_id: branch.task_id(),
                state: branch.state,
                output,
                error,
                attempts: branch.task.attempt_count(),
            };
            let (event_type, category) = match outcome.state {
                BranchState::Succeeded => (BranchEventType::Succeeded, HistoryCategory::Succeeded),
                BranchState::Aborted => (BranchEventType::Aborted, HistoryCategory::Aborted),
                _ => (BranchEventType::Failed, HistoryCategory::Failed),
            };
            let payload = json!({
                "attempts": outcome.attempts,
                "errorKind": outcome.error_kind(),
                "error": outcome.error.as_ref().map(|e| e.to_string()),
            });
            (event_type, category, payload, outcome)
        };

        match &outcome.error {
            Some(err) => warn!(branch_id = %self.id, strategy = %self.strategy, error = %err, "Branch failed"),
            None => info!(branch_id = %self.id, strategy = %self.strategy, state = ?outcome.state, "Branch finished"),
        }
        metrics::counter!("talon_branches_total", "strategy" => self.strategy.as_str(), "state" => event_label(event_type))
            .increment(1);

        *self.shared.outcome.lock() = Some(outcome);
        self.record_history(category, payload.clone());
        self.publish(event_type, payload);
        self.publish_status();
    }

    fn publish_status(&self) {
        let status = self.shared.branch.read().status();
        self.shared.status.send_replace(status);
    }

    fn publish(&self, event_type: BranchEventType, payload: Value) {
        let task_id = self.shared.branch.read().task_id();
        self.inner().bus.publish(BranchEvent {
            branch_id: self.id,
            task_id,
            parent_id: self.parent,
            event_type,
            strategy: self.strategy,
            timestamp: Utc::now(),
            payload,
        });
    }

    fn record_history(&self, category: HistoryCategory, payload: Value) {
        self.inner().history.append(
            HistoryEvent::new(category, self.id, self.strategy)
                .with_agent(self.agent)
                .with_payload(payload),
        );
    }
}

impl Drop for BranchRun {
    fn drop(&mut self) {
        // A panicking strategy or a runtime shutdown must still leave a terminal state.
        if self.shared.outcome.lock().is_none() {
            self.finish(Err(BranchEnd::Failed(OrchestratorError::Permanent(
                "branch task ended before finishing".into(),
            ))));
        }
    }
}

fn event_label(event_type: BranchEventType) -> &'static str {
    match event_type {
        BranchEventType::Succeeded => "succeeded",
        BranchEventType::Aborted => "aborted",
        _ => "failed",
    }
}

/// Child dispatcher handed to a branch's strategy context.
struct ChildScope {
    coordinator: BranchCoordinator,
    parent: Arc<BranchShared>,
    agent: Option<AgentId>,
    depth: u32,
}

#[async_trait]
impl ChildDispatcher for ChildScope {
    async fn dispatch_child(
        &self,
        parent: BranchId,
        task: ExecutionTask,
        strategy: StrategyKind,
        cancel: CancellationToken,
    ) -> BranchOutcome {
        let handle = self
            .coordinator
            .spawn_branch(task, strategy, Some(parent), self.agent, self.depth, cancel);
        self.parent.branch.write().children.push(handle.id());
        handle.wait().await
    }
}
