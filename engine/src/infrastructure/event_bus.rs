// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Engine Events
//
// In-memory streaming of EngineEvent values over a tokio broadcast channel.
// Events are not persisted; a lagging subscriber loses the oldest ones.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::event::LearningDomain;
use crate::domain::events::EngineEvent;

/// Event bus for publishing and subscribing to engine events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<EngineEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: EngineEvent) {
        debug!(event_type = event.event_type(), "Publishing engine event");

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all engine events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to events concerning a single domain
    pub fn subscribe_domain(&self, domain: LearningDomain) -> DomainEventReceiver {
        DomainEventReceiver {
            receiver: self.sender.subscribe(),
            domain,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
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

/// Receiver for all engine events
pub struct EventReceiver {
    receiver: broadcast::Receiver<EngineEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<EngineEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<EngineEvent, EventBusError> {
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

/// Receiver filtered to one learning domain
pub struct DomainEventReceiver {
    receiver: broadcast::Receiver<EngineEvent>,
    domain: LearningDomain,
}

impl DomainEventReceiver {
    /// Receive the next event for the subscribed domain. Domain-less events
    /// (consolidation, A/B conclusions) are skipped.
    pub async fn recv(&mut self) -> Result<EngineEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event_domain(&event) == Some(self.domain) {
                return Ok(event);
            }
        }
    }
}

fn event_domain(event: &EngineEvent) -> Option<LearningDomain> {
    match event {
        EngineEvent::OutcomeRecorded { domain, .. }
        | EngineEvent::StrategyAdapted { domain, .. }
        | EngineEvent::StrategySelected { domain, .. }
        | EngineEvent::StrategyArchived { domain, .. } => Some(*domain),
        EngineEvent::AbTestConcluded { .. } | EngineEvent::ConsolidationCompleted { .. } => None,
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}
