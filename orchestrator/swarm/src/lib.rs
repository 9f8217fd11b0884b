// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `talon-swarm`: Swarm Coordination Crate
//!
//! Session-level coordination on top of `talon-core`: forms a team of agents,
//! selects a strategy per task from performance history, records every
//! decision and reflects on recent failures to re-weight strategies.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `SwarmState`, `SwarmTeam`, `SwarmDecision`, `ReflectionReport`, `SwarmRepository` |
//! | [`application`] | Application | `SwarmCoordinator`, team formation, strategy selection |
//! | [`infrastructure`] | Infrastructure | `InMemorySwarmRepository` |
//!
//! ## Key Concepts
//!
//! - **Decision**: the strategy chosen for one task, with the confidence it was
//!   chosen at. Low confidence triggers reflection.
//! - **Reflection**: a pass over the rolling history that demotes strategies
//!   failing repeatedly inside the window and restores them after a clean streak.
//! - **Single writer**: only the coordinator mutates `SwarmState`; monitoring
//!   reads snapshots.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{SwarmCoordinator, SwarmError};
pub use domain::*;
