// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Rate Limiter - Token Bucket for Downstream Calls
//
// Independent of the resource pool: the pool bounds how many strategy calls
// run at once, the bucket bounds how fast they may be started.
//
// - capacity: upper bound on burst
// - refill_rate: tokens per second
// - burst: initial fill, bucket ceiling and the largest single request
//
// The bucket never holds more than `min(capacity, burst)` tokens, so an idle
// period cannot bank more than one burst.
//
// Acquired tokens are held in a RateTokens permit. A committed permit is spent;
// an uncommitted one is refunded to the bucket exactly once when dropped.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::config::RateLimitConfig;
use crate::domain::error::OrchestratorError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateLimitError {
    #[error("request for {requested} tokens exceeds burst size {burst}")]
    ExceedsBurst { requested: u32, burst: u32 },

    #[error("rate limited, retry after {retry_after_ms}ms")]
    Limited { retry_after_ms: u64 },

    #[error("timed out after {waited_ms}ms waiting for rate tokens")]
    Timeout { waited_ms: u64 },
}

impl From<RateLimitError> for OrchestratorError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::ExceedsBurst { .. } => OrchestratorError::Permanent(err.to_string()),
            RateLimitError::Limited { .. } => OrchestratorError::ResourceExhausted(err.to_string()),
            RateLimitError::Timeout { waited_ms } => OrchestratorError::Timeout {
                resource: "rate_limiter".to_string(),
                waited_ms,
            },
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

struct LimiterInner {
    /// Most tokens the bucket can hold.
    ceiling: f64,
    refill_rate: f64,
    burst: u32,
    bucket: Mutex<Bucket>,
    /// Tokens held by live, uncommitted permits.
    outstanding: AtomicU64,
    granted_total: AtomicU64,
    refunded_total: AtomicU64,
}

impl LimiterInner {
    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.ceiling);
        bucket.last_refill = now;
    }

    /// Take `n` tokens, or report how long until they will be available.
    fn take(&self, n: u32) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        let needed = f64::from(n);
        if bucket.tokens >= needed {
            bucket.tokens -= needed;
            self.outstanding.fetch_add(u64::from(n), Ordering::AcqRel);
            self.granted_total.fetch_add(u64::from(n), Ordering::AcqRel);
            Ok(())
        } else {
            let deficit = needed - bucket.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_rate))
        }
    }

    fn refund(&self, n: u32) {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens = (bucket.tokens + f64::from(n)).min(self.ceiling);
        self.outstanding.fetch_sub(u64::from(n), Ordering::AcqRel);
        self.refunded_total.fetch_add(u64::from(n), Ordering::AcqRel);
    }

    fn commit(&self, n: u32) {
        self.outstanding.fetch_sub(u64::from(n), Ordering::AcqRel);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterStats {
    pub available: f64,
    pub outstanding: u64,
    pub granted_total: u64,
    pub refunded_total: u64,
}

/// Token-bucket throttle shared by all branches.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<LimiterInner>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let burst = config.burst.clamp(1, config.capacity.max(1));
        Self {
            inner: Arc::new(LimiterInner {
                ceiling: f64::from(burst),
                refill_rate: config.refill_rate.max(f64::MIN_POSITIVE),
                burst,
                bucket: Mutex::new(Bucket {
                    tokens: f64::from(burst),
                    last_refill: Instant::now(),
                }),
                outstanding: AtomicU64::new(0),
                granted_total: AtomicU64::new(0),
                refunded_total: AtomicU64::new(0),
            }),
        }
    }

    fn check_burst(&self, n: u32) -> Result<(), RateLimitError> {
        if n > self.inner.burst {
            return Err(RateLimitError::ExceedsBurst {
                requested: n,
                burst: self.inner.burst,
            });
        }
        Ok(())
    }

    /// Take `n` tokens without waiting.
    pub fn try_acquire(&self, n: u32) -> Result<RateTokens, RateLimitError> {
        self.check_burst(n)?;
        match self.inner.take(n) {
            Ok(()) => Ok(self.permit(n)),
            Err(wait) => Err(RateLimitError::Limited {
                retry_after_ms: wait.as_millis().max(1) as u64,
            }),
        }
    }

    /// Take `n` tokens, waiting at most `timeout` for the bucket to refill.
    pub async fn acquire(&self, n: u32, timeout: Duration) -> Result<RateTokens, RateLimitError> {
        self.check_burst(n)?;
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            let wait = match self.inner.take(n) {
                Ok(()) => return Ok(self.permit(n)),
                Err(wait) => wait,
            };
            let now = Instant::now();
            if now + wait > deadline {
                // Sleep out the budget so callers observe the full timeout.
                tokio::time::sleep_until(deadline).await;
                if let Ok(()) = self.inner.take(n) {
                    return Ok(self.permit(n));
                }
                return Err(RateLimitError::Timeout {
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            debug!(tokens = n, wait_ms = wait.as_millis() as u64, "Waiting for rate tokens");
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently held by uncommitted permits.
    pub fn outstanding(&self) -> u64 {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    pub fn available(&self) -> f64 {
        let mut bucket = self.inner.bucket.lock();
        self.inner.refill(&mut bucket);
        bucket.tokens
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            available: self.available(),
            outstanding: self.outstanding(),
            granted_total: self.inner.granted_total.load(Ordering::Acquire),
            refunded_total: self.inner.refunded_total.load(Ordering::Acquire),
        }
    }

    fn permit(&self, n: u32) -> RateTokens {
        RateTokens {
            inner: self.inner.clone(),
            tokens: n,
            settled: AtomicBool::new(false),
        }
    }
}

/// Tokens taken from the bucket for one strategy call.
pub struct RateTokens {
    inner: Arc<LimiterInner>,
    tokens: u32,
    settled: AtomicBool,
}

impl RateTokens {
    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    /// Mark the tokens as spent. Only the first settle (commit or refund) counts.
    pub fn commit(&self) {
        if !self.settled.swap(true, Ordering::AcqRel) {
            self.inner.commit(self.tokens);
        }
    }

    /// Give the tokens back to the bucket.
    pub fn refund(&self) {
        if !self.settled.swap(true, Ordering::AcqRel) {
            self.inner.refund(self.tokens);
        }
    }
}

impl Drop for RateTokens {
    fn drop(&mut self) {
        self.refund();
    }
}

impl std::fmt::Debug for RateTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateTokens")
            .field("tokens", &self.tokens)
            .field("settled", &self.settled.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(capacity: u32, refill_rate: f64, burst: u32) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            capacity,
            refill_rate,
            burst,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_fill_is_burst() {
        let rl = limiter(10, 1.0, 3);
        for _ in 0..3 {
            rl.try_acquire(1).unwrap().commit();
        }
        assert!(matches!(rl.try_acquire(1), Err(RateLimitError::Limited { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_above_burst_is_rejected() {
        let rl = limiter(10, 1.0, 3);
        assert_eq!(
            rl.try_acquire(4).unwrap_err(),
            RateLimitError::ExceedsBurst {
                requested: 4,
                burst: 3
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped_at_burst() {
        let rl = limiter(5, 10.0, 2);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!((rl.available() - 2.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_bucket_grants_at_most_one_burst() {
        let rl = limiter(20, 10.0, 10);
        tokio::time::sleep(Duration::from_secs(10)).await;

        let mut granted = 0;
        while let Ok(permit) = rl.try_acquire(1) {
            permit.commit();
            granted += 1;
        }
        assert_eq!(granted, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refund_does_not_exceed_burst() {
        let rl = limiter(20, 10.0, 4);
        let permit = rl.try_acquire(3).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        permit.refund();
        assert!((rl.available() - 4.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let rl = limiter(4, 2.0, 2);
        rl.try_acquire(2).unwrap().commit();

        let started = Instant::now();
        let permit = rl.acquire(1, Duration::from_secs(5)).await.unwrap();
        permit.commit();
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out() {
        let rl = limiter(4, 1.0, 2);
        rl.try_acquire(2).unwrap().commit();

        let err = rl.acquire(2, Duration::from_millis(300)).await.unwrap_err();
        assert!(matches!(err, RateLimitError::Timeout { waited_ms } if waited_ms >= 300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_permit_is_refunded_once() {
        let rl = limiter(4, 0.001, 4);
        let permit = rl.try_acquire(3).unwrap();
        assert_eq!(rl.outstanding(), 3);

        permit.refund();
        permit.refund();
        drop(permit);

        assert_eq!(rl.outstanding(), 0);
        assert_eq!(rl.stats().refunded_total, 3);
        assert!(rl.available() >= 4.0 - 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_committed_permit_is_not_refunded() {
        let rl = limiter(4, 0.001, 4);
        let permit = rl.try_acquire(2).unwrap();
        permit.commit();
        drop(permit);
        assert_eq!(rl.outstanding(), 0);
        assert!(rl.available() < 2.1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_throughput_bounded_by_refill() {
        let rl = limiter(5, 10.0, 5);
        let started = Instant::now();
        let mut granted = 0u32;
        while started.elapsed() < Duration::from_secs(2) {
            rl.acquire(1, Duration::from_secs(1)).await.unwrap().commit();
            granted += 1;
        }
        // burst + refill_rate * elapsed, with one token of slack for the last refill
        let bound = 5.0 + 10.0 * started.elapsed().as_secs_f64() + 1.0;
        assert!(f64::from(granted) <= bound, "granted {} > {}", granted, bound);
        assert!(granted >= 20);
    }
}
