// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Branch Events
//
// In-memory event streaming over a tokio broadcast channel.
// Publication never blocks: a subscriber that falls more than `capacity`
// events behind loses the oldest ones and is told how many it missed.
//
// Events are in-memory only; durable consumers attach an EventSink.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::branch::BranchId;
use crate::domain::events::BranchEvent;

/// Event bus for publishing and subscribing to branch events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<BranchEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified per-subscriber capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1024)
    pub fn with_default_capacity() -> Self {
        Self::new(1024)
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: BranchEvent) {
        debug!(
            branch_id = %event.branch_id,
            event_type = ?event.event_type,
            "Publishing branch event"
        );

        // send() only fails when nobody is listening
        if self.sender.send(event).is_err() {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all branch events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the events of a single branch
    pub fn subscribe_branch(&self, branch_id: BranchId) -> BranchEventReceiver {
        BranchEventReceiver {
            receiver: self.sender.subscribe(),
            branch_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all branch events
pub struct EventReceiver {
    receiver: broadcast::Receiver<BranchEvent>,
}

impl EventReceiver {
    /// Receive the next event, waiting until one is available
    pub async fn recv(&mut self) -> Result<BranchEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without waiting
    pub fn try_recv(&mut self) -> Result<BranchEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for a single branch (filtered)
pub struct BranchEventReceiver {
    receiver: broadcast::Receiver<BranchEvent>,
    branch_id: BranchId,
}

impl BranchEventReceiver {
    /// Receive the next event of the watched branch, skipping all others
    pub async fn recv(&mut self) -> Result<BranchEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.branch_id == self.branch_id {
                return Ok(event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
