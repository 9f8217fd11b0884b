// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Orchestrator Error Taxonomy
//!
//! Every failure the orchestrator can surface maps onto one [`ErrorKind`]. The
//! kind is what `BranchHandle::status()` reports for a terminal branch; the
//! richer [`OrchestratorError`] carries the detail for logs and callers.
//!
//! | Kind | Retried | Surfaced |
//! |------|---------|----------|
//! | `Transient` | up to `max_attempts` | as `Exhausted` |
//! | `ResourceExhausted` | requeued up to `max_requeues` | as `Exhausted` |
//! | `Permanent`, `PolicyViolation`, `UnknownStrategy`, `CircuitOpen` | never | immediately |
//! | `Timeout` | never | immediately, partial state kept |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::policy::PolicyViolation;
use crate::domain::strategy::StrategyKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigError,
    UnknownStrategy,
    Timeout,
    Transient,
    Permanent,
    ResourceExhausted,
    PolicyViolation,
    CircuitOpen,
    Exhausted,
}

impl ErrorKind {
    /// Whether a failure of this kind may be attempted again inside the same branch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::ResourceExhausted)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ConfigError => "config_error",
            Self::UnknownStrategy => "unknown_strategy",
            Self::Timeout => "timeout",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::ResourceExhausted => "resource_exhausted",
            Self::PolicyViolation => "policy_violation",
            Self::CircuitOpen => "circuit_open",
            Self::Exhausted => "exhausted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("No compatible strategy registered for {0}")]
    UnknownStrategy(String),

    #[error("Timed out waiting for {resource} after {waited_ms}ms")]
    Timeout { resource: String, waited_ms: u64 },

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Permanent failure: {0}")]
    Permanent(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Policy violation: {0}")]
    PolicyViolation(#[from] PolicyViolation),

    #[error("Circuit open: dispatch rejected for {retry_after_ms}ms")]
    CircuitOpen { retry_after_ms: u64 },

    #[error("Retry budget exhausted after {attempts} attempts: {reason}")]
    Exhausted { attempts: u32, reason: String },
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::ConfigError,
            Self::UnknownStrategy(_) => ErrorKind::UnknownStrategy,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Transient(_) => ErrorKind::Transient,
            Self::Permanent(_) => ErrorKind::Permanent,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::PolicyViolation(_) => ErrorKind::PolicyViolation,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Exhausted { .. } => ErrorKind::Exhausted,
        }
    }

    pub fn unknown_strategy(kind: StrategyKind) -> Self {
        Self::UnknownStrategy(kind.to_string())
    }
}
