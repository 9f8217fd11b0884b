// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod backoff;
pub mod branch_coordinator;
pub mod performance;
pub mod strategies;
pub mod validation;

// Re-export use cases for convenience
pub use backoff::RetryPolicy;
pub use branch_coordinator::{BranchCoordinator, BranchHandle, CoordinatorParts};
pub use performance::PerformanceTracker;
pub use strategies::StrategyFactory;
pub use validation::{AdmissionValidator, SecurityValidator};
