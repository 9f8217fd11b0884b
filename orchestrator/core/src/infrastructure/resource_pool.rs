// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Resource Pool
//!
//! Bounds the number of concurrently executing strategy calls. A caller
//! acquires a [`ResourceLease`] with a priority and a timeout; the lease gives
//! its slot back exactly once, either through [`ResourceLease::release`] or when
//! it is dropped.
//!
//! Waiters are served highest priority first, FIFO within a priority. A freed
//! slot is handed directly to the next live waiter, so a late arrival can never
//! overtake someone already queued. A waiter that gives up (timeout or
//! cancellation) after a slot was already handed to it passes that slot on.
//!
//! The effective capacity can be lowered or raised at runtime by a capacity
//! policy, but never above the configured maximum.

use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::domain::error::OrchestratorError;
use crate::domain::task::Priority;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("timed out after {waited_ms}ms waiting for a pool slot")]
    Timeout { waited_ms: u64 },

    #[error("resource pool is closed")]
    Closed,
}

impl From<PoolError> for OrchestratorError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Timeout { waited_ms } => OrchestratorError::Timeout {
                resource: "resource_pool".to_string(),
                waited_ms,
            },
            PoolError::Closed => OrchestratorError::ResourceExhausted(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub max_capacity: usize,
    pub capacity: usize,
    pub in_use: usize,
    pub waiting: usize,
    pub acquired_total: u64,
    pub released_total: u64,
}

struct Waiter {
    priority: Priority,
    seq: u64,
    tx: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    // Max-heap: higher priority wins, then the earlier arrival.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct PoolState {
    in_use: usize,
    next_seq: u64,
    waiters: BinaryHeap<Waiter>,
}

struct PoolInner {
    max_capacity: usize,
    capacity: AtomicUsize,
    state: Mutex<PoolState>,
    released: Notify,
    acquired_total: AtomicU64,
    released_total: AtomicU64,
}

impl PoolInner {
    /// Give one slot back: hand it to the best live waiter or free it.
    fn release_slot(&self) {
        let capacity = self.capacity.load(Ordering::Acquire);
        let mut state = self.state.lock();
        self.released_total.fetch_add(1, Ordering::AcqRel);

        if state.in_use <= capacity {
            while let Some(waiter) = state.waiters.pop() {
                if waiter.tx.send(()).is_ok() {
                    self.acquired_total.fetch_add(1, Ordering::AcqRel);
                    trace!(priority = waiter.priority.0, "Slot handed to waiter");
                    drop(state);
                    self.released.notify_waiters();
                    return;
                }
            }
        }

        state.in_use = state.in_use.saturating_sub(1);
        drop(state);
        self.released.notify_waiters();
    }

    /// Grant queued waiters while there is spare capacity.
    fn grant_spare(&self) {
        let capacity = self.capacity.load(Ordering::Acquire);
        let mut state = self.state.lock();
        while state.in_use < capacity {
            let Some(waiter) = state.waiters.pop() else {
                break;
            };
            if waiter.tx.send(()).is_ok() {
                state.in_use += 1;
                self.acquired_total.fetch_add(1, Ordering::AcqRel);
            }
        }
    }
}

/// Priority-aware counting pool of execution slots.
#[derive(Clone)]
pub struct ResourcePool {
    inner: Arc<PoolInner>,
}

impl ResourcePool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(PoolInner {
                max_capacity: capacity,
                capacity: AtomicUsize::new(capacity),
                state: Mutex::new(PoolState::default()),
                released: Notify::new(),
                acquired_total: AtomicU64::new(0),
                released_total: AtomicU64::new(0),
            }),
        }
    }

    /// Acquire a slot, waiting at most `timeout`.
    pub async fn acquire(&self, priority: Priority, timeout: Duration) -> Result<ResourceLease, PoolError> {
        let started = Instant::now();
        let rx = {
            let capacity = self.inner.capacity.load(Ordering::Acquire);
            let mut state = self.inner.state.lock();
            if state.in_use < capacity {
                state.in_use += 1;
                self.inner.acquired_total.fetch_add(1, Ordering::AcqRel);
                return Ok(self.lease(priority));
            }
            let (tx, rx) = oneshot::channel();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.waiters.push(Waiter { priority, seq, tx });
            rx
        };

        debug!(priority = priority.0, "Waiting for a pool slot");
        let mut ticket = WaitTicket {
            inner: &self.inner,
            rx: Some(rx),
        };

        let outcome = match ticket.rx.as_mut() {
            Some(rx) => tokio::time::timeout(timeout, rx).await,
            None => return Err(PoolError::Closed),
        };
        match outcome {
            Ok(Ok(())) => {
                ticket.rx = None;
                Ok(self.lease(priority))
            }
            Ok(Err(_)) => {
                ticket.rx = None;
                Err(PoolError::Closed)
            }
            // The ticket's drop hands back a slot that raced the timeout.
            Err(_) => Err(PoolError::Timeout {
                waited_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }

    /// Acquire a slot only if one is free right now.
    pub fn try_acquire(&self, priority: Priority) -> Option<ResourceLease> {
        let capacity = self.inner.capacity.load(Ordering::Acquire);
        let mut state = self.inner.state.lock();
        if state.in_use < capacity {
            state.in_use += 1;
            self.inner.acquired_total.fetch_add(1, Ordering::AcqRel);
            Some(self.lease(priority))
        } else {
            None
        }
    }

    /// Wait until a slot is free or any lease is released. Returns `false` on timeout.
    pub async fn wait_for_release(&self, timeout: Duration) -> bool {
        let notified = self.inner.released.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.available() > 0 {
            return true;
        }
        tokio::time::timeout(timeout, notified).await.is_ok()
    }

    /// Adjust the effective capacity, clamped to `1..=max_capacity`.
    pub fn set_capacity(&self, capacity: usize) {
        let capacity = capacity.clamp(1, self.inner.max_capacity);
        let previous = self.inner.capacity.swap(capacity, Ordering::AcqRel);
        if capacity != previous {
            debug!(previous, capacity, "Pool capacity adjusted");
        }
        if capacity > previous {
            self.inner.grant_spare();
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity.load(Ordering::Acquire)
    }

    pub fn max_capacity(&self) -> usize {
        self.inner.max_capacity
    }

    pub fn in_use(&self) -> usize {
        self.inner.state.lock().in_use
    }

    pub fn available(&self) -> usize {
        self.capacity().saturating_sub(self.in_use())
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            max_capacity: self.inner.max_capacity,
            capacity: self.inner.capacity.load(Ordering::Acquire),
            in_use: state.in_use,
            waiting: state.waiters.iter().filter(|w| !w.tx.is_closed()).count(),
            acquired_total: self.inner.acquired_total.load(Ordering::Acquire),
            released_total: self.inner.released_total.load(Ordering::Acquire),
        }
    }

    fn lease(&self, priority: Priority) -> ResourceLease {
        ResourceLease {
            inner: self.inner.clone(),
            priority,
            released: AtomicBool::new(false),
        }
    }
}

/// Pending wait. Dropping it without taking the slot returns any slot that
/// was already handed over.
struct WaitTicket<'a> {
    inner: &'a Arc<PoolInner>,
    rx: Option<oneshot::Receiver<()>>,
}

impl Drop for WaitTicket<'_> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                self.inner.release_slot();
            }
        }
    }
}

/// A held pool slot.
pub struct ResourceLease {
    inner: Arc<PoolInner>,
    priority: Priority,
    released: AtomicBool,
}

impl ResourceLease {
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Return the slot. Only the first call has an effect.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.inner.release_slot();
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ResourceLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLease")
            .field("priority", &self.priority)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const LONG: Duration = Duration::from_secs(60);

    async fn wait_until_waiting(pool: &ResourcePool, n: usize) {
        while pool.stats().waiting < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_grants_up_to_capacity() {
        let pool = ResourcePool::new(2);
        let a = pool.acquire(Priority::NORMAL, LONG).await.unwrap();
        let _b = pool.acquire(Priority::NORMAL, LONG).await.unwrap();
        assert!(pool.try_acquire(Priority::HIGH).is_none());

        a.release();
        assert_eq!(pool.in_use(), 1);
        assert!(pool.try_acquire(Priority::NORMAL).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_is_idempotent() {
        let pool = ResourcePool::new(1);
        let lease = pool.acquire(Priority::NORMAL, LONG).await.unwrap();
        lease.release();
        lease.release();
        drop(lease);

        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.acquired_total, 1);
        assert_eq!(stats.released_total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_when_exhausted() {
        let pool = ResourcePool::new(1);
        let _held = pool.acquire(Priority::NORMAL, LONG).await.unwrap();

        let err = pool
            .acquire(Priority::HIGH, Duration::from_millis(250))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Timeout { waited_ms } if waited_ms >= 250));
        assert_eq!(pool.stats().waiting, 0);
        assert_eq!(pool.in_use(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_higher_priority_served_first() {
        let pool = ResourcePool::new(1);
        let held = pool.acquire(Priority::NORMAL, LONG).await.unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for (label, priority) in [("low", Priority::LOW), ("high", Priority::HIGH)] {
            let waiter_pool = pool.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _lease = waiter_pool.acquire(priority, LONG).await.unwrap();
                order.lock().push(label);
            }));
            wait_until_waiting(&pool, handles.len()).await;
        }

        held.release();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec!["high", "low"]);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_within_priority() {
        let pool = ResourcePool::new(1);
        let held = pool.acquire(Priority::NORMAL, LONG).await.unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for label in ["first", "second", "third"] {
            let waiter_pool = pool.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _lease = waiter_pool.acquire(Priority::NORMAL, LONG).await.unwrap();
                order.lock().push(label);
            }));
            wait_until_waiting(&pool, handles.len()).await;
        }

        drop(held);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_does_not_leak() {
        let pool = ResourcePool::new(1);
        let held = pool.acquire(Priority::NORMAL, LONG).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(Priority::NORMAL, LONG).await })
        };
        wait_until_waiting(&pool, 1).await;
        waiter.abort();
        let _ = waiter.await;

        held.release();
        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.acquired_total, stats.released_total);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_capacity_under_concurrency() {
        let pool = ResourcePool::new(3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..24u8)
            .map(|i| {
                let pool = pool.clone();
                let current = current.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    let lease = pool.acquire(Priority(i % 3), LONG).await.unwrap();
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10 + u64::from(i % 4))).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    drop(lease);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.acquired_total, 24);
        assert_eq!(stats.released_total, 24);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_release() {
        let pool = ResourcePool::new(1);
        assert!(pool.wait_for_release(Duration::from_millis(1)).await);

        let held = pool.acquire(Priority::NORMAL, LONG).await.unwrap();
        assert!(!pool.wait_for_release(Duration::from_millis(100)).await);

        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            held.release();
        });
        assert!(pool.wait_for_release(Duration::from_secs(1)).await);
        releaser.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_adjustment() {
        let pool = ResourcePool::new(2);
        pool.set_capacity(1);
        let _a = pool.acquire(Priority::NORMAL, LONG).await.unwrap();
        assert!(pool.try_acquire(Priority::NORMAL).is_none());

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(Priority::NORMAL, LONG).await.map(|_| ()) })
        };
        wait_until_waiting(&pool, 1).await;

        pool.set_capacity(10);
        assert_eq!(pool.capacity(), 2);
        waiter.await.unwrap().unwrap();
    }
}
