// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod circuit_breaker;
pub mod event_bus;
pub mod event_sink;
pub mod rate_limiter;
pub mod resource_pool;
pub mod rolling_history;
pub mod usage_tracker;

pub use circuit_breaker::{CircuitBreaker, CircuitPermit, CircuitState};
pub use event_bus::{EventBus, EventBusError, EventReceiver};
pub use event_sink::{spawn_forwarder, EventSink, TracingEventSink};
pub use rate_limiter::{RateLimitError, RateLimiter, RateTokens};
pub use resource_pool::{PoolError, PoolStats, ResourceLease, ResourcePool};
pub use rolling_history::{HistoryPattern, RollingHistory};
pub use usage_tracker::{CapacityPolicy, FixedCapacity, LatencyBackoffPolicy, UsageSnapshot, UsageTracker};
