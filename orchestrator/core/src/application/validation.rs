// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Admission Validation
//!
//! [`SecurityValidator`] checks every capability a task requests against the
//! configured [`SecurityPolicy`] before any pool slot or rate token is taken.
//! A rejection is terminal for the branch and the strategy is never invoked.

use tracing::warn;

use crate::domain::policy::{PolicyViolation, SecurityPolicy};
use crate::domain::task::ExecutionTask;

pub trait AdmissionValidator: Send + Sync {
    fn validate(&self, task: &ExecutionTask) -> Result<(), PolicyViolation>;
}

#[derive(Debug, Clone, Default)]
pub struct SecurityValidator {
    policy: SecurityPolicy,
}

impl SecurityValidator {
    pub fn new(policy: SecurityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }
}

impl AdmissionValidator for SecurityValidator {
    fn validate(&self, task: &ExecutionTask) -> Result<(), PolicyViolation> {
        for capability in &task.required_capabilities {
            if let Err(violation) = self.policy.evaluate(capability) {
                warn!(task_id = %task.id, %violation, "Task rejected at admission");
                metrics::counter!("talon_policy_violations_total").increment(1);
                return Err(violation);
            }
        }
        Ok(())
    }
}
