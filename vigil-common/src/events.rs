//! Event types for the vigil progress event system
//!
//! Batch runs publish progress on a broadcast [`EventBus`]. Subscribers
//! (a dashboard feed, the CLI, tests) receive every event emitted after they
//! subscribe; slow subscribers lose the oldest events rather than stalling
//! the workers.

use crate::ConcernLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Vigil event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VigilEvent {
    /// A batch run computed its pending set and is about to dispatch
    BatchStarted {
        run_id: Uuid,
        model_id: String,
        pending: usize,
        concurrency: usize,
        timestamp: DateTime<Utc>,
    },

    /// One work item finished for one model (success, failed or skipped)
    ItemCompleted {
        run_id: Uuid,
        model_id: String,
        work_item_id: i64,
        status: String,
        concern_level: Option<ConcernLevel>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Periodic aggregate progress
    BatchProgress {
        run_id: Uuid,
        model_id: String,
        completed: usize,
        total: usize,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        items_per_second: f64,
        eta_seconds: Option<u64>,
        timestamp: DateTime<Utc>,
    },

    /// Batch run finished (or was cancelled)
    BatchCompleted {
        run_id: Uuid,
        model_id: String,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        cancelled: bool,
        elapsed_seconds: f64,
        timestamp: DateTime<Utc>,
    },

    /// An ensemble verdict was written or rewritten
    VerdictUpdated {
        work_item_id: i64,
        concern_level: ConcernLevel,
        confidence: f64,
        fusion_count: i64,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for [`VigilEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<VigilEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    ///
    /// # Examples
    ///
    /// ```
    /// use vigil_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<VigilEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: VigilEvent,
    ) -> Result<usize, broadcast::error::SendError<VigilEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: VigilEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
