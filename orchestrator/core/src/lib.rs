// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Talon Core
//!
//! Tiered agent-execution orchestrator: accepts tasks, runs each one through a
//! pluggable strategy under bounded concurrency and rate limiting, retries
//! transient failures with backoff, and records per-strategy performance for
//! the swarm layer to learn from.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, branch coordination and shared infrastructure
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`domain`] | tasks, branches, strategies, errors, events, config |
//! | [`application`] | branch coordinator, retry policy, strategies, admission |
//! | [`infrastructure`] | pool, rate limiter, breaker, event bus, history, usage |

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
