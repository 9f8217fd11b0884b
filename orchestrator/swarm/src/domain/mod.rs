// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Domain Layer
//!
//! Pure domain types for swarm coordination. No I/O dependencies.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`swarm`] | `SwarmState`, `SwarmTeam`, `SwarmDecision`, `ReflectionReport` |
//! | [`repository`] | `SwarmRepository`, `RepositoryError` |

pub mod repository;
pub mod swarm;

pub use repository::*;
pub use swarm::*;
