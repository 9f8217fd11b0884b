// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Retry Policy
//
// delay(k) = min(base * 2^k + jitter, max), jitter drawn from
// [0, jitter_ratio * base * 2^k], k = retry index starting at 0.
//
// With jitter_ratio <= 1 the upper end of step k never exceeds the lower end
// of step k + 1, so the sequence is non-decreasing whatever jitter is drawn.

use std::time::Duration;

use crate::domain::config::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0),
        }
    }

    /// Whether another invocation is allowed after `attempts_made` invocations.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay before retry `retry_index` with random jitter.
    pub fn delay(&self, retry_index: u32) -> Duration {
        self.delay_with_jitter(retry_index, rand::random::<f64>())
    }

    /// Delay before retry `retry_index`, with `unit_jitter` in `[0, 1]` picking
    /// the position inside the jitter band.
    pub fn delay_with_jitter(&self, retry_index: u32, unit_jitter: f64) -> Duration {
        let base_ms = self.base_delay.as_secs_f64() * 1000.0;
        let max_ms = self.max_delay.as_secs_f64() * 1000.0;
        let exponential = base_ms * 2f64.powi(retry_index.min(62) as i32);
        let jitter = exponential * self.jitter_ratio * unit_jitter.clamp(0.0, 1.0);
        let delay_ms = (exponential + jitter).min(max_ms);
        Duration::from_secs_f64(delay_ms / 1000.0)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::from_config(&RetryConfig {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter_ratio: 1.0,
            max_requeues: 0,
        })
    }

    #[test]
    fn exponential_without_jitter() {
        let p = policy();
        let delays: Vec<u128> = (0..5).map(|k| p.delay_with_jitter(k, 0.0).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000]);
    }

    #[test]
    fn sequence_is_monotone_and_bounded_for_any_jitter() {
        let p = policy();
        for _ in 0..200 {
            let mut previous = Duration::ZERO;
            for k in 0..12 {
                let d = p.delay(k);
                assert!(d >= previous, "delay({}) = {:?} < {:?}", k, d, previous);
                assert!(d <= p.max_delay);
                previous = d;
            }
        }
    }

    #[test]
    fn worst_case_jitter_meets_next_floor() {
        let p = policy();
        assert_eq!(p.delay_with_jitter(0, 1.0), p.delay_with_jitter(1, 0.0));
    }

    #[test]
    fn attempt_budget() {
        let p = policy();
        assert!(p.allows_another(4));
        assert!(!p.allows_another(5));
    }

    #[test]
    fn huge_retry_index_saturates_at_max() {
        assert_eq!(policy().delay(u32::MAX), Duration::from_millis(1_000));
    }
}
