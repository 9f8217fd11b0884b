// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Strategies
//!
//! Built-in [`StrategyExecutor`] implementations and the [`StrategyFactory`]
//! registry that resolves them by [`StrategyKind`].
//!
//! | Kind | Executor | Idempotent | Runs |
//! |------|----------|------------|------|
//! | `Deterministic` | [`DeterministicStrategy`] | yes | in-process evaluation |
//! | `Conversational` | [`ConversationalStrategy`] | no | dialogue through a [`ConversationClient`] |
//! | `Reasoning` | [`ReasoningStrategy`] | yes | child branches through the coordinator |

pub mod conversational;
pub mod deterministic;
pub mod reasoning;

pub use conversational::{ClientError, ConversationClient, ConversationReply, ConversationalStrategy};
pub use deterministic::{BuiltinEvaluator, DeterministicStrategy, Evaluator};
pub use reasoning::{Decomposer, PartialSuccess, PayloadDecomposer, ReasoningStrategy, Subtask};

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::error::OrchestratorError;
use crate::domain::strategy::{StrategyExecutor, StrategyKind};
use crate::domain::task::TaskFeatures;

/// Typed registry of strategy executors.
#[derive(Clone, Default)]
pub struct StrategyFactory {
    executors: BTreeMap<StrategyKind, Arc<dyn StrategyExecutor>>,
}

impl StrategyFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `executor` under its own kind, replacing any previous one.
    pub fn register(&mut self, executor: Arc<dyn StrategyExecutor>) -> &mut Self {
        let kind = executor.kind();
        if self.executors.insert(kind, executor).is_some() {
            tracing::debug!(strategy = %kind, "Replaced registered strategy");
        }
        self
    }

    pub fn with(mut self, executor: Arc<dyn StrategyExecutor>) -> Self {
        self.register(executor);
        self
    }

    pub fn resolve(&self, kind: StrategyKind) -> Result<Arc<dyn StrategyExecutor>, OrchestratorError> {
        self.executors
            .get(&kind)
            .cloned()
            .ok_or_else(|| OrchestratorError::unknown_strategy(kind))
    }

    pub fn is_registered(&self, kind: StrategyKind) -> bool {
        self.executors.contains_key(&kind)
    }

    /// Registered kinds in declaration order.
    pub fn registered(&self) -> Vec<StrategyKind> {
        self.executors.keys().copied().collect()
    }

    /// Registered kinds able to run a task with `features`, in declaration order.
    pub fn compatible(&self, features: &TaskFeatures) -> Vec<StrategyKind> {
        self.executors
            .iter()
            .filter(|(_, executor)| executor.supports(features))
            .map(|(kind, _)| *kind)
            .collect()
    }
}

impl std::fmt::Debug for StrategyFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyFactory")
            .field("registered", &self.registered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ErrorKind;

    #[test]
    fn resolves_registered_and_rejects_unknown() {
        let factory = StrategyFactory::new().with(Arc::new(DeterministicStrategy::default()));
        assert!(factory.resolve(StrategyKind::Deterministic).is_ok());

        let err = factory.resolve(StrategyKind::Reasoning).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::UnknownStrategy);
    }

    #[test]
    fn registered_follows_declaration_order() {
        let factory = StrategyFactory::new()
            .with(Arc::new(ReasoningStrategy::default()))
            .with(Arc::new(DeterministicStrategy::default()));
        assert_eq!(
            factory.registered(),
            vec![StrategyKind::Deterministic, StrategyKind::Reasoning]
        );
    }

    #[test]
    fn compatible_filters_by_features() {
        let factory = StrategyFactory::new()
            .with(Arc::new(DeterministicStrategy::default()))
            .with(Arc::new(ReasoningStrategy::default()));

        let io = TaskFeatures {
            external_io: true,
            decomposable: true,
            ..Default::default()
        };
        assert_eq!(factory.compatible(&io), vec![StrategyKind::Reasoning]);

        let multi_turn = TaskFeatures {
            multi_turn: true,
            ..Default::default()
        };
        assert!(factory.compatible(&multi_turn).is_empty());
    }
}
