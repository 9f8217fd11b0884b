// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end dispatch scenarios: pool contention, retry backoff, admission
//! rejection and the dispatch circuit breaker.

mod common;

use std::sync::Arc;
use std::time::Duration;

use talon_core::domain::branch::BranchState;
use talon_core::domain::config::SwarmConfig;
use talon_core::domain::error::ErrorKind;
use talon_core::domain::events::BranchEventType;
use talon_core::domain::policy::SecurityPolicy;
use talon_core::domain::strategy::{FailureClass, StrategyExecutor, StrategyKind, StrategyResult};
use talon_core::infrastructure::circuit_breaker::CircuitState;

use common::{coordinator_with, task, ScriptedStrategy};

#[tokio::test(start_paused = true)]
async fn test_third_task_waits_for_a_free_slot() {
    let mut config = SwarmConfig::default();
    config.pool_capacity = 2;
    let strategy = Arc::new(
        ScriptedStrategy::new(StrategyKind::Deterministic).with_delay(Duration::from_millis(100)),
    );
    let coordinator = coordinator_with(config, vec![strategy.clone() as Arc<dyn StrategyExecutor>]);

    let t0 = tokio::time::Instant::now();
    let handles: Vec<_> = (0..3)
        .map(|_| coordinator.dispatch(task(), StrategyKind::Deterministic))
        .collect();
    for handle in &handles {
        assert!(handle.wait().await.is_success());
    }

    let mut starts = strategy.starts();
    starts.sort();
    assert_eq!(starts.len(), 3);
    assert!(starts[0] < t0 + Duration::from_millis(100));
    assert!(starts[1] < t0 + Duration::from_millis(100));
    assert!(starts[2] >= t0 + Duration::from_millis(100));

    let stats = coordinator.pool().stats();
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.acquired_total, 3);
    assert_eq!(stats.released_total, 3);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_back_off_then_succeed() {
    let mut config = SwarmConfig::default();
    config.retry.max_attempts = 3;
    config.retry.base_delay_ms = 100;
    config.retry.max_delay_ms = 1000;
    let strategy = Arc::new(ScriptedStrategy::new(StrategyKind::Deterministic).with_script(vec![
        StrategyResult::transient("flaky upstream"),
        StrategyResult::transient("flaky upstream"),
    ]));
    let coordinator = coordinator_with(config, vec![strategy.clone() as Arc<dyn StrategyExecutor>]);
    let mut events = coordinator.event_bus().subscribe();

    let handle = coordinator.dispatch(task(), StrategyKind::Deterministic);
    let outcome = handle.wait().await;
    assert_eq!(outcome.state, BranchState::Succeeded);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(strategy.invocations(), 3);

    let mut delays = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.event_type == BranchEventType::Retrying {
            delays.push(event.payload["delayMs"].as_u64().unwrap());
        }
    }
    assert_eq!(delays.len(), 2);
    assert!((100..=110).contains(&delays[0]), "first delay {}", delays[0]);
    assert!((200..=220).contains(&delays[1]), "second delay {}", delays[1]);

    let starts = strategy.starts();
    assert!(starts[1] - starts[0] >= Duration::from_millis(100));
    assert!(starts[2] - starts[1] >= Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_failures_below_the_attempt_budget_still_succeed() {
    for failures in 0..3 {
        let mut config = SwarmConfig::default();
        config.retry.max_attempts = 3;
        let script = (0..failures).map(|_| StrategyResult::transient("blip")).collect();
        let strategy =
            Arc::new(ScriptedStrategy::new(StrategyKind::Deterministic).with_script(script));
        let coordinator = coordinator_with(config, vec![strategy as Arc<dyn StrategyExecutor>]);

        let outcome = coordinator.dispatch(task(), StrategyKind::Deterministic).wait().await;
        assert!(outcome.is_success(), "{} failures", failures);
        assert_eq!(outcome.attempts, failures + 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_attempt_budget_exhaustion() {
    let mut config = SwarmConfig::default();
    config.retry.max_attempts = 3;
    let strategy = Arc::new(ScriptedStrategy::new(StrategyKind::Deterministic).with_script(vec![
        StrategyResult::transient("down"),
        StrategyResult::transient("down"),
        StrategyResult::transient("down"),
    ]));
    let coordinator = coordinator_with(config, vec![strategy.clone() as Arc<dyn StrategyExecutor>]);

    let handle = coordinator.dispatch(task(), StrategyKind::Deterministic);
    let outcome = handle.wait().await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::Exhausted));
    assert_eq!(outcome.attempts, 3);
    assert_eq!(strategy.invocations(), 3);
    assert_eq!(handle.snapshot().attempts().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_policy_violation_never_invokes_the_strategy() {
    let mut config = SwarmConfig::default();
    config.security = SecurityPolicy::new(vec!["compute.*"], Vec::<&str>::new());
    let strategy = Arc::new(ScriptedStrategy::new(StrategyKind::Deterministic));
    let coordinator = coordinator_with(config, vec![strategy.clone() as Arc<dyn StrategyExecutor>]);

    let handle = coordinator.dispatch(
        task().with_capabilities(vec!["net.http"]),
        StrategyKind::Deterministic,
    );
    let outcome = handle.wait().await;

    assert_eq!(outcome.state, BranchState::Failed);
    assert_eq!(handle.status().error_kind, Some(ErrorKind::PolicyViolation));
    assert_eq!(strategy.invocations(), 0);
    assert_eq!(outcome.attempts, 0);
    assert_eq!(coordinator.pool().stats().acquired_total, 0);
}

#[tokio::test(start_paused = true)]
async fn test_allowed_capabilities_pass_admission() {
    let mut config = SwarmConfig::default();
    config.security = SecurityPolicy::new(vec!["compute.*"], vec!["compute.gpu"]);
    let strategy = Arc::new(ScriptedStrategy::new(StrategyKind::Deterministic));
    let coordinator = coordinator_with(config, vec![strategy.clone() as Arc<dyn StrategyExecutor>]);

    let allowed = coordinator
        .dispatch(task().with_capabilities(vec!["compute.cpu"]), StrategyKind::Deterministic)
        .wait()
        .await;
    assert!(allowed.is_success());

    let denied = coordinator
        .dispatch(task().with_capabilities(vec!["compute.gpu"]), StrategyKind::Deterministic)
        .wait()
        .await;
    assert_eq!(denied.error_kind(), Some(ErrorKind::PolicyViolation));
    assert_eq!(strategy.invocations(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opens_then_recovers_through_a_probe() {
    let mut config = SwarmConfig::default();
    config.retry.max_attempts = 1;
    config.circuit_breaker.failure_threshold = 5;
    config.circuit_breaker.window_ms = 10_000;
    config.circuit_breaker.cooldown_ms = 30_000;
    let strategy = Arc::new(
        ScriptedStrategy::new(StrategyKind::Deterministic)
            .with_script((0..5).map(|_| StrategyResult::transient("backend down")).collect()),
    );
    let coordinator = coordinator_with(config, vec![strategy.clone() as Arc<dyn StrategyExecutor>]);

    for _ in 0..5 {
        let outcome = coordinator.dispatch(task(), StrategyKind::Deterministic).wait().await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Exhausted));
    }
    assert_eq!(coordinator.circuit_breaker().state(), CircuitState::Open);

    let rejected = coordinator.dispatch(task(), StrategyKind::Deterministic).wait().await;
    assert_eq!(rejected.error_kind(), Some(ErrorKind::CircuitOpen));
    assert_eq!(strategy.invocations(), 5);

    tokio::time::advance(Duration::from_secs(30)).await;

    let probe = coordinator.dispatch(task(), StrategyKind::Deterministic).wait().await;
    assert!(probe.is_success());
    assert_eq!(strategy.invocations(), 6);
    assert_eq!(coordinator.circuit_breaker().state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_requeue_waits_for_capacity_then_succeeds() {
    let strategy = Arc::new(ScriptedStrategy::new(StrategyKind::Deterministic).with_script(vec![
        StrategyResult::failure(FailureClass::ResourceExhausted, "quota"),
        StrategyResult::failure(FailureClass::ResourceExhausted, "quota"),
    ]));
    let coordinator = coordinator_with(
        SwarmConfig::default(),
        vec![strategy.clone() as Arc<dyn StrategyExecutor>],
    );

    let handle = coordinator.dispatch(task(), StrategyKind::Deterministic);
    let outcome = handle.wait().await;
    assert!(outcome.is_success());
    assert_eq!(handle.snapshot().requeues, 2);
    assert_eq!(strategy.invocations(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_requeue_backs_off_while_slots_are_free() {
    let strategy = Arc::new(ScriptedStrategy::new(StrategyKind::Deterministic).with_script(vec![
        StrategyResult::failure(FailureClass::ResourceExhausted, "downstream quota"),
        StrategyResult::failure(FailureClass::ResourceExhausted, "downstream quota"),
    ]));
    let coordinator = coordinator_with(
        SwarmConfig::default(),
        vec![strategy.clone() as Arc<dyn StrategyExecutor>],
    );
    let mut events = coordinator.event_bus().subscribe();

    let outcome = coordinator.dispatch(task(), StrategyKind::Deterministic).wait().await;
    assert!(outcome.is_success());
    assert_eq!(coordinator.pool().in_use(), 0);

    let mut delays = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.event_type == BranchEventType::Retrying {
            delays.push(event.payload["delayMs"].as_u64().unwrap());
        }
    }
    assert_eq!(delays.len(), 2);
    assert!((100..=110).contains(&delays[0]), "first requeue delay {}", delays[0]);
    assert!((200..=220).contains(&delays[1]), "second requeue delay {}", delays[1]);

    let starts = strategy.starts();
    assert_eq!(starts.len(), 3);
    assert!(starts[1] - starts[0] >= Duration::from_millis(100));
    assert!(starts[2] - starts[1] >= Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_requeue_budget_is_bounded() {
    let mut config = SwarmConfig::default();
    config.retry.max_requeues = 1;
    let exhausted = || {
        StrategyResult::failure(FailureClass::ResourceExhausted, "quota")
    };
    let strategy = Arc::new(
        ScriptedStrategy::new(StrategyKind::Deterministic).with_script(vec![exhausted(), exhausted()]),
    );
    let coordinator = coordinator_with(config, vec![strategy.clone() as Arc<dyn StrategyExecutor>]);

    let outcome = coordinator.dispatch(task(), StrategyKind::Deterministic).wait().await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::Exhausted));
    assert_eq!(strategy.invocations(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_non_idempotent_side_effect_allows_one_retry_only() {
    let mut config = SwarmConfig::default();
    config.retry.max_attempts = 5;
    let partial = || StrategyResult::transient("connection reset mid-send").with_idempotent(false);
    let strategy = Arc::new(
        ScriptedStrategy::new(StrategyKind::Conversational)
            .non_idempotent()
            .with_script(vec![partial(), partial(), partial()]),
    );
    let coordinator = coordinator_with(config, vec![strategy.clone() as Arc<dyn StrategyExecutor>]);

    let outcome = coordinator.dispatch(task(), StrategyKind::Conversational).wait().await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::Exhausted));
    assert_eq!(strategy.invocations(), 2);
    let message = outcome.error.map(|e| e.to_string()).unwrap_or_default();
    assert!(message.contains("unsafe to retry"), "{}", message);
}

#[tokio::test(start_paused = true)]
async fn test_non_idempotent_strategy_retries_side_effect_free_failures() {
    let mut config = SwarmConfig::default();
    config.retry.max_attempts = 4;
    let strategy = Arc::new(
        ScriptedStrategy::new(StrategyKind::Conversational)
            .non_idempotent()
            .with_script(vec![
                StrategyResult::transient("not delivered"),
                StrategyResult::transient("not delivered"),
                StrategyResult::transient("not delivered"),
            ]),
    );
    let coordinator = coordinator_with(config, vec![strategy.clone() as Arc<dyn StrategyExecutor>]);

    let outcome = coordinator.dispatch(task(), StrategyKind::Conversational).wait().await;
    assert!(outcome.is_success());
    assert_eq!(strategy.invocations(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_history_and_performance_see_every_attempt() {
    let strategy = Arc::new(
        ScriptedStrategy::new(StrategyKind::Deterministic)
            .with_script(vec![StrategyResult::transient("once")]),
    );
    let coordinator = coordinator_with(
        SwarmConfig::default(),
        vec![strategy as Arc<dyn StrategyExecutor>],
    );

    let outcome = coordinator
        .dispatch(task().with_hint(StrategyKind::Deterministic), StrategyKind::Deterministic)
        .wait()
        .await;
    assert!(outcome.is_success());

    let metrics = coordinator.performance().metrics(StrategyKind::Deterministic);
    assert_eq!(metrics.samples, 2);
    assert_eq!(metrics.successes, 1);
    assert_eq!(
        coordinator.history().failures_within(StrategyKind::Deterministic, Duration::from_secs(60)),
        1
    );
    assert_eq!(coordinator.usage().snapshot().attempts, 2);
}
