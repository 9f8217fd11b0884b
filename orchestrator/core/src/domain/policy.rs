// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Admission Policy
//!
//! A [`SecurityPolicy`] lists the capability patterns a task may request and the
//! capabilities that are always refused. Patterns support:
//!
//! - `"*"`: matches any capability
//! - `"fs.*"`: matches any capability starting with `"fs."`
//! - `"fs.read"`: exact match only
//!
//! Evaluation order: deny list first (explicit denies take precedence), then
//! the allow patterns. Anything unmatched is refused.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyViolation {
    #[error("capability '{capability}' is explicitly denied")]
    CapabilityDenied { capability: String },

    #[error("capability '{capability}' is not allowed (allowed: {allowed:?})")]
    CapabilityNotAllowed {
        capability: String,
        allowed: Vec<String>,
    },

    #[error("malformed capability '{0}'")]
    MalformedCapability(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicy {
    /// Capability patterns a task may request.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Capabilities refused regardless of `allow`.
    #[serde(default)]
    pub deny: Vec<String>,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            allow: vec!["*".to_string()],
            deny: Vec::new(),
        }
    }
}

impl SecurityPolicy {
    pub fn new<A, D, S>(allow: A, deny: D) -> Self
    where
        A: IntoIterator<Item = S>,
        D: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow: allow.into_iter().map(Into::into).collect(),
            deny: deny.into_iter().map(Into::into).collect(),
        }
    }

    /// Evaluate a single requested capability.
    pub fn evaluate(&self, capability: &str) -> Result<(), PolicyViolation> {
        if capability.trim().is_empty() || capability.contains(char::is_whitespace) {
            return Err(PolicyViolation::MalformedCapability(capability.to_string()));
        }

        if self.deny.iter().any(|pattern| matches_pattern(pattern, capability)) {
            return Err(PolicyViolation::CapabilityDenied {
                capability: capability.to_string(),
            });
        }

        if self.allow.iter().any(|pattern| matches_pattern(pattern, capability)) {
            return Ok(());
        }

        Err(PolicyViolation::CapabilityNotAllowed {
            capability: capability.to_string(),
            allowed: self.allow.clone(),
        })
    }
}

fn matches_pattern(pattern: &str, capability: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return capability
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'));
    }
    pattern == capability
}
