//! Event bus for decoupled communication

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::sync::{PassSummary, TriggerReason};

/// Core lifecycle and sync events
#[derive(Debug, Clone)]
pub enum Event {
    /// Core has started
    CoreStarted,

    /// Core is shutting down
    CoreShutdown,

    /// Device connectivity flipped
    ConnectivityChanged { online: bool },

    /// A report was persisted to the local queue
    ReportQueued { correlation_id: Uuid },

    /// A drain pass began
    SyncPassStarted { reason: TriggerReason },

    /// A report reached the remote store
    ReportSynced {
        correlation_id: Uuid,
        canonical_id: String,
    },

    /// A transient failure; the report stays queued with backoff
    ReportDeferred {
        correlation_id: Uuid,
        retry_count: u32,
        error: String,
    },

    /// Automatic attempts exhausted; only external triggers retry it now
    ReportParked { correlation_id: Uuid },

    /// The remote store permanently rejected a report
    ReportRejected {
        correlation_id: Uuid,
        error: String,
    },

    /// A drain pass finished with aggregate counts
    SyncPassCompleted { summary: PassSummary },

    /// An operator acknowledged a canonical report
    ReportAcknowledged { canonical_id: String },
}

/// Event bus for broadcasting events
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus with specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event
    pub fn emit(&self, event: Event) {
        // Ignore send errors (no receivers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
