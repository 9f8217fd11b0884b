// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Repository Interface
//!
//! Persistence contract for [`SwarmState`] and its performance aggregates.
//! The interface lives in the domain layer; `crate::infrastructure` ships the
//! in-memory implementation used for development and testing.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::swarm::{SwarmId, SwarmMetrics, SwarmState};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Repository for swarm session state. One aggregate root: [`SwarmState`].
#[async_trait]
pub trait SwarmRepository: Send + Sync {
    /// Save state (create or update)
    async fn save_state(&self, state: &SwarmState) -> Result<(), RepositoryError>;

    async fn load_state(&self, id: SwarmId) -> Result<Option<SwarmState>, RepositoryError>;

    async fn save_metrics(&self, metrics: &SwarmMetrics) -> Result<(), RepositoryError>;

    async fn load_metrics(&self, id: SwarmId) -> Result<Option<SwarmMetrics>, RepositoryError>;

    async fn list_states(&self) -> Result<Vec<SwarmId>, RepositoryError>;
}
