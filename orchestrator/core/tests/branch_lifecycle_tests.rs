// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cancellation, deadlines, shutdown and reasoning child branches, with a
//! focus on resources coming back exactly once.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use talon_core::application::strategies::{DeterministicStrategy, ReasoningStrategy};
use talon_core::application::BranchHandle;
use talon_core::domain::branch::{AttemptOutcome, BranchState};
use talon_core::domain::config::SwarmConfig;
use talon_core::domain::error::ErrorKind;
use talon_core::domain::events::BranchEventType;
use talon_core::domain::strategy::{StrategyExecutor, StrategyKind};
use talon_core::domain::task::{ExecutionTask, Priority, TaskFeatures};

use common::{coordinator_with, task, ScriptedStrategy};

async fn until_running(handle: &BranchHandle) {
    while handle.status().state != BranchState::Running {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

fn decomposable(payload: serde_json::Value) -> ExecutionTask {
    ExecutionTask::new(payload).with_features(TaskFeatures {
        decomposable: true,
        ..Default::default()
    })
}

#[tokio::test(start_paused = true)]
async fn test_cancel_returns_lease_and_tokens() {
    let strategy = Arc::new(
        ScriptedStrategy::new(StrategyKind::Deterministic).with_delay(Duration::from_secs(10)),
    );
    let coordinator = coordinator_with(
        SwarmConfig::default(),
        vec![strategy.clone() as Arc<dyn StrategyExecutor>],
    );

    let handle = coordinator.dispatch(task(), StrategyKind::Deterministic);
    until_running(&handle).await;
    assert_eq!(coordinator.pool().in_use(), 1);
    assert_eq!(coordinator.rate_limiter().outstanding(), 1);

    handle.cancel();
    let outcome = handle.wait().await;

    assert_eq!(outcome.state, BranchState::Aborted);
    assert!(outcome.error.is_none());
    let pool = coordinator.pool().stats();
    assert_eq!(pool.in_use, 0);
    assert_eq!(pool.acquired_total, pool.released_total);
    assert_eq!(coordinator.rate_limiter().outstanding(), 0);
    assert_eq!(coordinator.rate_limiter().stats().refunded_total, 1);

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.attempts().len(), 1);
    assert_eq!(snapshot.attempts()[0].outcome, AttemptOutcome::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_queued_for_a_slot() {
    let mut config = SwarmConfig::default();
    config.pool_capacity = 1;
    let strategy = Arc::new(
        ScriptedStrategy::new(StrategyKind::Deterministic).with_delay(Duration::from_secs(5)),
    );
    let coordinator = coordinator_with(config, vec![strategy.clone() as Arc<dyn StrategyExecutor>]);

    let running = coordinator.dispatch(task(), StrategyKind::Deterministic);
    until_running(&running).await;
    let queued = coordinator.dispatch(task(), StrategyKind::Deterministic);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(coordinator.pool().stats().waiting, 1);

    queued.cancel();
    assert_eq!(queued.wait().await.state, BranchState::Aborted);
    assert!(queued.snapshot().attempts().is_empty());

    assert!(running.wait().await.is_success());
    assert_eq!(strategy.invocations(), 1);
    let pool = coordinator.pool().stats();
    assert_eq!(pool.in_use, 0);
    assert_eq!(pool.waiting, 0);
    assert_eq!(pool.acquired_total, pool.released_total);
}

#[tokio::test(start_paused = true)]
async fn test_saturated_pool_leaves_direct_acquire_pending() {
    let mut config = SwarmConfig::default();
    config.pool_capacity = 1;
    let strategy = Arc::new(
        ScriptedStrategy::new(StrategyKind::Deterministic).with_delay(Duration::from_secs(1)),
    );
    let coordinator = coordinator_with(config, vec![strategy as Arc<dyn StrategyExecutor>]);

    let handle = coordinator.dispatch(task(), StrategyKind::Deterministic);
    until_running(&handle).await;

    let mut acquire = tokio_test::task::spawn(
        coordinator.pool().acquire(Priority::HIGH, Duration::from_secs(5)),
    );
    tokio_test::assert_pending!(acquire.poll());
    drop(acquire);

    assert!(handle.wait().await.is_success());
    assert_eq!(coordinator.pool().in_use(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_times_out_and_keeps_the_record() {
    let strategy = Arc::new(
        ScriptedStrategy::new(StrategyKind::Deterministic).with_delay(Duration::from_secs(10)),
    );
    let coordinator = coordinator_with(
        SwarmConfig::default(),
        vec![strategy as Arc<dyn StrategyExecutor>],
    );

    let deadline = Utc::now() + chrono::Duration::milliseconds(500);
    let handle = coordinator.dispatch(task().with_deadline(deadline), StrategyKind::Deterministic);
    let outcome = handle.wait().await;

    assert_eq!(outcome.state, BranchState::Failed);
    assert_eq!(outcome.error_kind(), Some(ErrorKind::Timeout));
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.attempts().len(), 1);
    assert_eq!(snapshot.attempts()[0].outcome, AttemptOutcome::Cancelled);
    assert_eq!(coordinator.pool().in_use(), 0);
    assert_eq!(coordinator.rate_limiter().outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_aborts_every_branch() {
    let strategy = Arc::new(
        ScriptedStrategy::new(StrategyKind::Deterministic).with_delay(Duration::from_secs(60)),
    );
    let coordinator = coordinator_with(
        SwarmConfig::default(),
        vec![strategy as Arc<dyn StrategyExecutor>],
    );

    let first = coordinator.dispatch(task(), StrategyKind::Deterministic);
    let second = coordinator.dispatch(task(), StrategyKind::Deterministic);
    until_running(&first).await;
    until_running(&second).await;

    coordinator.shutdown();
    assert_eq!(first.wait().await.state, BranchState::Aborted);
    assert_eq!(second.wait().await.state, BranchState::Aborted);
    assert_eq!(coordinator.pool().in_use(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reasoning_runs_children_through_the_coordinator() {
    let coordinator = coordinator_with(
        SwarmConfig::default(),
        vec![
            Arc::new(DeterministicStrategy::default()) as Arc<dyn StrategyExecutor>,
            Arc::new(ReasoningStrategy::default()),
        ],
    );
    let mut events = coordinator.event_bus().subscribe();

    let handle = coordinator.dispatch(
        decomposable(json!({
            "subtasks": [
                {"op": "sum", "args": [1, 2]},
                {"payload": {"op": "echo", "value": "x"}, "strategy": "deterministic"}
            ]
        })),
        StrategyKind::Reasoning,
    );
    let outcome = handle.wait().await;

    assert!(outcome.is_success());
    let output = outcome.output.unwrap();
    assert_eq!(output["results"], json!([3, "x"]));
    assert_eq!(output["succeeded"], json!(2));

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.children.len(), 2);

    let mut child_successes = 0;
    while let Ok(event) = events.try_recv() {
        if event.parent_id == Some(handle.id()) && event.event_type == BranchEventType::Succeeded {
            assert!(snapshot.children.contains(&event.branch_id));
            child_successes += 1;
        }
    }
    assert_eq!(child_successes, 2);
    assert_eq!(coordinator.pool().in_use(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reasoning_depth_is_bounded() {
    let mut config = SwarmConfig::default();
    config.max_depth = 0;
    let coordinator = coordinator_with(
        config,
        vec![
            Arc::new(DeterministicStrategy::default()) as Arc<dyn StrategyExecutor>,
            Arc::new(ReasoningStrategy::default()),
        ],
    );

    let handle = coordinator.dispatch(
        decomposable(json!({"subtasks": [{"op": "sum", "args": [1]}]})),
        StrategyKind::Reasoning,
    );
    let outcome = handle.wait().await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::Permanent));
    assert_eq!(handle.snapshot().children.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelling_a_parent_aborts_its_children() {
    let slow = Arc::new(
        ScriptedStrategy::new(StrategyKind::Conversational).with_delay(Duration::from_secs(30)),
    );
    let coordinator = coordinator_with(
        SwarmConfig::default(),
        vec![
            slow.clone() as Arc<dyn StrategyExecutor>,
            Arc::new(ReasoningStrategy::default()),
        ],
    );
    let mut events = coordinator.event_bus().subscribe();

    let handle = coordinator.dispatch(
        decomposable(json!({
            "subtasks": [
                {"payload": "a", "strategy": "conversational"},
                {"payload": "b", "strategy": "conversational"}
            ]
        })),
        StrategyKind::Reasoning,
    );
    while slow.invocations() < 2 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(coordinator.pool().in_use(), 3);

    handle.cancel();
    assert_eq!(handle.wait().await.state, BranchState::Aborted);

    let mut aborted = 0;
    while aborted < 3 {
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("abort events arrive")
            .expect("bus open");
        if event.event_type == BranchEventType::Aborted {
            aborted += 1;
        }
    }
    assert_eq!(coordinator.pool().in_use(), 0);
    assert_eq!(coordinator.rate_limiter().outstanding(), 0);
}
