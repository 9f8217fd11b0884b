// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Swarm Configuration
//
// Defines the configuration surface of a Talon node:
// - Pool capacity and lease timeout
// - Token-bucket rate limit for downstream calls
// - Retry / backoff and requeue budget
// - Circuit breaker thresholds
// - Reflection thresholds used by the swarm coordinator
// - Team-size bounds, default strategy weights and admission policy
//
// Loaded from YAML (camelCase keys). Immutable once a coordinator is built.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::error::OrchestratorError;
use crate::domain::policy::SecurityPolicy;
use crate::domain::strategy::StrategyKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmConfig {
    /// Maximum concurrently held execution slots.
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,

    /// How long a branch waits for a slot before failing with `Timeout`.
    #[serde(default = "default_lease_timeout_ms")]
    pub lease_timeout_ms: u64,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub reflection: ReflectionConfig,

    #[serde(default)]
    pub team: TeamConfig,

    /// Initial selection weight per strategy. Missing strategies default to 1.0.
    #[serde(default)]
    pub strategy_weights: BTreeMap<StrategyKind, f64>,

    /// Per-subscriber event buffer; the oldest events are dropped past this.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Maximum events retained by the rolling history.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Maximum nesting of Reasoning child branches.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    #[serde(default)]
    pub security: SecurityPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Upper bound for `burst`.
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_rate: f64,
    /// Tokens the bucket holds when full, also the largest single request.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            refill_rate: 10.0,
            burst: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Total strategy invocations per branch, first attempt included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Jitter as a fraction of the exponential component, in `[0, 1]`.
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    /// How often a `ResourceExhausted` branch is requeued before giving up.
    #[serde(default = "default_max_requeues")]
    pub max_requeues: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            jitter_ratio: default_jitter_ratio(),
            max_requeues: default_max_requeues(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    /// Failures inside the window needed to open the circuit.
    pub failure_threshold: u32,
    pub window_ms: u64,
    pub cooldown_ms: u64,
    /// Minimum failure ratio inside the window, in `[0, 1]`.
    #[serde(default = "default_min_failure_rate")]
    pub min_failure_rate: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_ms: 10_000,
            cooldown_ms: 30_000,
            min_failure_rate: default_min_failure_rate(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectionConfig {
    /// Decisions below this confidence trigger reflection.
    pub confidence_threshold: f64,
    pub history_window_ms: u64,
    /// Failures within the window that demote a strategy or agent.
    pub failure_threshold: usize,
    /// Consecutive failures of the chosen strategy that trigger reflection.
    pub failure_streak: usize,
    /// Consecutive successes that clear a demotion.
    pub promote_after: usize,
    pub demotion_factor: f64,
    pub min_weight: f64,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.35,
            history_window_ms: 60_000,
            failure_threshold: 3,
            failure_streak: 3,
            promote_after: 5,
            demotion_factor: 0.5,
            min_weight: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamConfig {
    pub min_size: usize,
    pub max_size: usize,
    /// Capabilities the team must cover.
    #[serde(default)]
    pub required_capabilities: Vec<String>,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 8,
            required_capabilities: Vec::new(),
        }
    }
}

fn default_pool_capacity() -> usize {
    4
}
fn default_lease_timeout_ms() -> u64 {
    30_000
}
fn default_event_bus_capacity() -> usize {
    1024
}
fn default_history_capacity() -> usize {
    4096
}
fn default_max_depth() -> u32 {
    3
}
fn default_jitter_ratio() -> f64 {
    0.1
}
fn default_max_requeues() -> u32 {
    5
}
fn default_min_failure_rate() -> f64 {
    0.5
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            pool_capacity: default_pool_capacity(),
            lease_timeout_ms: default_lease_timeout_ms(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            reflection: ReflectionConfig::default(),
            team: TeamConfig::default(),
            strategy_weights: BTreeMap::new(),
            event_bus_capacity: default_event_bus_capacity(),
            history_capacity: default_history_capacity(),
            max_depth: default_max_depth(),
            security: SecurityPolicy::default(),
        }
    }
}

impl SwarmConfig {
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    pub fn history_window(&self) -> Duration {
        Duration::from_millis(self.reflection.history_window_ms)
    }

    /// Configured weight for `kind`, 1.0 when unset.
    pub fn weight_for(&self, kind: StrategyKind) -> f64 {
        self.strategy_weights.get(&kind).copied().unwrap_or(1.0)
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover a config file: env var, working directory, user home, system.
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("TALON_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./talon-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".talon").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/talon/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must load
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            config.validate()?;
            return Ok(config);
        }

        let mut config = if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            Self::from_yaml_file(config_path)?
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides for container deployments.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TALON_POOL_CAPACITY") {
            match val.parse() {
                Ok(capacity) => self.pool_capacity = capacity,
                Err(_) => tracing::warn!("Ignoring invalid TALON_POOL_CAPACITY: {}", val),
            }
        }
        if let Ok(val) = std::env::var("TALON_MAX_ATTEMPTS") {
            match val.parse() {
                Ok(attempts) => self.retry.max_attempts = attempts,
                Err(_) => tracing::warn!("Ignoring invalid TALON_MAX_ATTEMPTS: {}", val),
            }
        }
    }

    pub fn validate(&self) -> Result<(), OrchestratorError> {
        let fail = |msg: String| Err(OrchestratorError::Config(msg));

        if self.pool_capacity == 0 {
            return fail("poolCapacity must be at least 1".into());
        }
        if self.rate_limit.capacity == 0 {
            return fail("rateLimit.capacity must be at least 1".into());
        }
        if !(self.rate_limit.refill_rate > 0.0) {
            return fail("rateLimit.refillRate must be positive".into());
        }
        if self.rate_limit.burst == 0 || self.rate_limit.burst > self.rate_limit.capacity {
            return fail(format!(
                "rateLimit.burst must be within 1..={}",
                self.rate_limit.capacity
            ));
        }
        if self.retry.max_attempts == 0 {
            return fail("retry.maxAttempts must be at least 1".into());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return fail("retry.baseDelayMs must not exceed retry.maxDelayMs".into());
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            return fail("retry.jitterRatio must be within [0, 1]".into());
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return fail("circuitBreaker.failureThreshold must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.circuit_breaker.min_failure_rate) {
            return fail("circuitBreaker.minFailureRate must be within [0, 1]".into());
        }
        if !(0.0..=1.0).contains(&self.reflection.confidence_threshold) {
            return fail("reflection.confidenceThreshold must be within [0, 1]".into());
        }
        if !(self.reflection.demotion_factor > 0.0 && self.reflection.demotion_factor < 1.0) {
            return fail("reflection.demotionFactor must be within (0, 1)".into());
        }
        if self.reflection.failure_threshold == 0 || self.reflection.failure_streak == 0 {
            return fail("reflection thresholds must be at least 1".into());
        }
        if self.team.min_size > self.team.max_size {
            return fail(format!(
                "team.minSize ({}) exceeds team.maxSize ({})",
                self.team.min_size, self.team.max_size
            ));
        }
        for (kind, weight) in &self.strategy_weights {
            if !(*weight > 0.0) {
                return fail(format!("strategyWeights.{} must be positive", kind));
            }
        }
        if self.event_bus_capacity == 0 || self.history_capacity == 0 {
            return fail("eventBusCapacity and historyCapacity must be at least 1".into());
        }
        Ok(())
    }
}
