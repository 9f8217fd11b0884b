// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Pure types of the orchestrator: tasks, branches, strategies, errors,
//! events and configuration. Nothing in here spawns tasks or holds locks.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Aggregates, value objects and the strategy contract

pub mod agent;
pub mod branch;
pub mod config;
pub mod error;
pub mod events;
pub mod performance;
pub mod policy;
pub mod strategy;
pub mod task;
