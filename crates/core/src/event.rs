//! Domain event system: decoupled observation of the memory subsystem.
//!
//! The orchestrator publishes events as it assembles contexts and handles
//! writes. Observers subscribe without the orchestrator knowing about them.

use crate::context::MissingReason;
use crate::layer::{Intent, MemoryLayer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A context was assembled for a request
    ContextAssembled {
        user_id: String,
        intent: Intent,
        layers: Vec<MemoryLayer>,
        tokens_used: usize,
        budget: usize,
        latency_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An attempted layer contributed nothing
    LayerMissing {
        user_id: String,
        layer: MemoryLayer,
        reason: MissingReason,
        detail: String,
        timestamp: DateTime<Utc>,
    },

    /// A decision reached the durable store
    DecisionRecorded {
        user_id: String,
        decision_id: String,
        symbol: String,
        duplicate: bool,
        timestamp: DateTime<Utc>,
    },

    /// A write-time summary could not be refreshed
    SummaryRecomputeFailed {
        subject_key: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// A run's cached tool results were released
    RunReleased {
        run_id: String,
        entries_removed: usize,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
