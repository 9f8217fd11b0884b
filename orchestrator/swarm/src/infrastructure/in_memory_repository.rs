// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::repository::{RepositoryError, SwarmRepository};
use crate::domain::swarm::{SwarmId, SwarmMetrics, SwarmState};

/// Thread-safe HashMap-backed storage. State is lost on restart.
#[derive(Clone, Default)]
pub struct InMemorySwarmRepository {
    states: Arc<RwLock<HashMap<SwarmId, SwarmState>>>,
    metrics: Arc<RwLock<HashMap<SwarmId, SwarmMetrics>>>,
}

impl InMemorySwarmRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SwarmRepository for InMemorySwarmRepository {
    async fn save_state(&self, state: &SwarmState) -> Result<(), RepositoryError> {
        self.states.write().insert(state.id, state.clone());
        Ok(())
    }

    async fn load_state(&self, id: SwarmId) -> Result<Option<SwarmState>, RepositoryError> {
        Ok(self.states.read().get(&id).cloned())
    }

    async fn save_metrics(&self, metrics: &SwarmMetrics) -> Result<(), RepositoryError> {
        self.metrics.write().insert(metrics.swarm_id, metrics.clone());
        Ok(())
    }

    async fn load_metrics(&self, id: SwarmId) -> Result<Option<SwarmMetrics>, RepositoryError> {
        Ok(self.metrics.read().get(&id).cloned())
    }

    async fn list_states(&self) -> Result<Vec<SwarmId>, RepositoryError> {
        Ok(self.states.read().keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use talon_core::domain::performance::PerformanceMetrics;
    use talon_core::domain::strategy::StrategyKind;

    #[tokio::test]
    async fn saves_and_overwrites_state() {
        let repo = InMemorySwarmRepository::new();
        let mut state = SwarmState::new(BTreeMap::new());
        repo.save_state(&state).await.unwrap();

        state.reflections = 3;
        repo.save_state(&state).await.unwrap();

        let loaded = repo.load_state(state.id).await.unwrap().unwrap();
        assert_eq!(loaded.reflections, 3);
        assert_eq!(repo.list_states().await.unwrap(), vec![state.id]);
        assert!(repo.load_state(SwarmId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stores_metrics_per_swarm() {
        let repo = InMemorySwarmRepository::new();
        let id = SwarmId::new();
        let metrics = SwarmMetrics {
            swarm_id: id,
            strategies: vec![PerformanceMetrics::empty(StrategyKind::Deterministic)],
            recorded_at: Utc::now(),
        };
        repo.save_metrics(&metrics).await.unwrap();
        assert_eq!(repo.load_metrics(id).await.unwrap(), Some(metrics));
    }
}
