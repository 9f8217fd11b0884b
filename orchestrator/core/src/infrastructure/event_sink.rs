// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Sinks
//
// An EventSink is an external consumer of branch events (log shipper, audit
// store, UI stream). `spawn_forwarder` attaches one to the bus in its own task
// so that a slow sink can only ever lag, never stall publishers.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::events::{BranchEvent, BranchEventType};
use crate::infrastructure::event_bus::{EventBus, EventBusError};

#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, event: &BranchEvent) -> anyhow::Result<()>;
}

/// Writes every branch event to the tracing subscriber.
#[derive(Debug, Default, Clone)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn deliver(&self, event: &BranchEvent) -> anyhow::Result<()> {
        match event.event_type {
            BranchEventType::Failed | BranchEventType::Aborted => warn!(
                branch_id = %event.branch_id,
                task_id = %event.task_id,
                strategy = %event.strategy,
                payload = %event.payload,
                "branch {:?}", event.event_type
            ),
            _ => info!(
                branch_id = %event.branch_id,
                task_id = %event.task_id,
                strategy = %event.strategy,
                "branch {:?}", event.event_type
            ),
        }
        Ok(())
    }
}

/// Forward bus events to `sink` until the bus closes or `shutdown` fires.
///
/// Delivery errors are logged and skipped. Lag is logged and forwarding resumes
/// from the oldest retained event.
pub fn spawn_forwarder(
    bus: &EventBus,
    sink: Arc<dyn EventSink>,
    shutdown: CancellationToken,
) -> JoinHandle<u64> {
    let mut receiver = bus.subscribe();
    tokio::spawn(async move {
        let mut delivered = 0u64;
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = receiver.recv() => next,
            };
            match next {
                Ok(event) => match sink.deliver(&event).await {
                    Ok(()) => delivered += 1,
                    Err(e) => warn!(sink = sink.name(), error = %e, "Event sink delivery failed"),
                },
                Err(EventBusError::Lagged(n)) => {
                    warn!(sink = sink.name(), missed = n, "Event sink fell behind");
                }
                Err(EventBusError::Closed) | Err(EventBusError::Empty) => break,
            }
        }
        debug!(sink = sink.name(), delivered, "Event forwarder stopped");
        delivered
    })
}
