//! Event system for counter changes
//!
//! Every ledger call the engine makes is published on the bus after it
//! commits. Useful for:
//! - Audit logging
//! - Tests that watch the engine without polling the database

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::classify::Sex;
use crate::geo::Placement;

/// Counter change events emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatsEvent {
    PopulationChanged {
        placement: Placement,
        sex: Sex,
        step: i64,
    },
    DiseaseCasesChanged {
        placement: Placement,
        disease_key: String,
        sex: Sex,
        step: i64,
    },
    CountersReset {
        rows: usize,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &StatsEvent);
}

/// Event bus for broadcasting counter events
pub struct EventBus {
    sender: broadcast::Sender<StatsEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: StatsEvent) {
        trace!(event = ?event, "Emitting stats event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatsEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs every counter change
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &StatsEvent) {
        match event {
            StatsEvent::PopulationChanged { placement, sex, step } => {
                debug!(placement = %placement, sex = %sex, step, "Population changed");
            }
            StatsEvent::DiseaseCasesChanged {
                placement,
                disease_key,
                sex,
                step,
            } => {
                debug!(
                    placement = %placement,
                    disease = %disease_key,
                    sex = %sex,
                    step,
                    "Disease cases changed"
                );
            }
            StatsEvent::CountersReset { rows } => {
                info!(rows, "Counters reset");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
