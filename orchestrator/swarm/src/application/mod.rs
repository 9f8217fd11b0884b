// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application
//!
//! Swarm use cases: team formation, strategy selection, decisions and
//! reflection.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Coordinates the branch coordinator on behalf of a swarm session

pub mod coordinator;
pub mod selection;
pub mod team;

pub use coordinator::{SwarmCoordinator, SwarmError};
pub use selection::{StrategyScore, StrategySelection};
pub use team::form_team;
