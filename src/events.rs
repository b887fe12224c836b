//! Event system for cuesync
//!
//! Defines the central event enum and the broadcast bus that carries it.
//! Events are externally observable facts about the sync cycle; internal
//! pipeline traffic (audio frames, match outcomes, engine commands) moves
//! over dedicated mpsc channels instead and never touches this bus.
//!
//! Events are broadcast via [`EventBus`] and can be serialized for SSE
//! transmission. All events use this central enum for type safety and
//! exhaustive matching.

use crate::sync::cycle::CyclePhase;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// All events emitted by the sync engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// Sync cycle moved between Idle, Listening and Paused
    ///
    /// Triggers:
    /// - SSE: update observers
    /// - Status snapshot: republished alongside this event
    CycleStateChanged {
        old_state: CyclePhase,
        new_state: CyclePhase,
        /// Accepted matches since the session started
        match_count: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A match report was accepted for the current listening phase
    ///
    /// Triggers:
    /// - Theater time estimation and the sync decision
    /// - Frame forwarding gate closes for the rest of the phase
    MatchAccepted {
        media_id: Uuid,
        title: Option<String>,
        /// Where the matched audio sits in the reference soundtrack (seconds)
        reference_offset_seconds: f64,
        match_count: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A match report arrived but was not acted on
    ///
    /// Emitted when a report arrives outside a listening phase or after the
    /// phase already accepted one. Diagnostics only.
    MatchDiscarded {
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The matching engine reported that a frame produced no match
    NoMatchReported {
        reason: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Player position drifted past the threshold; a seek was issued
    SeekIssued {
        target_seconds: f64,
        player_position_seconds: f64,
        difference_seconds: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Player was within the threshold; no seek needed
    SeekSkipped {
        target_seconds: f64,
        player_position_seconds: f64,
        difference_seconds: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An issued seek completed and its round trip was measured
    ///
    /// Triggers:
    /// - Latency tracker: round-trip sample recorded, sentinels reset
    SeekCompleted {
        target_seconds: f64,
        /// Seek issued to seek completed (seconds)
        round_trip_seconds: f64,
        /// Match received to seek completed (seconds), when measurable
        end_to_end_seconds: Option<f64>,
        /// End-to-end latency under the configured health threshold
        performance_good: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Ambient audio capture could not be acquired or failed mid-phase
    CaptureFailed {
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The matching engine session ended unexpectedly
    MatcherFailed {
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl SyncEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            SyncEvent::CycleStateChanged { .. } => "CycleStateChanged",
            SyncEvent::MatchAccepted { .. } => "MatchAccepted",
            SyncEvent::MatchDiscarded { .. } => "MatchDiscarded",
            SyncEvent::NoMatchReported { .. } => "NoMatchReported",
            SyncEvent::SeekIssued { .. } => "SeekIssued",
            SyncEvent::SeekSkipped { .. } => "SeekSkipped",
            SyncEvent::SeekCompleted { .. } => "SeekCompleted",
            SyncEvent::CaptureFailed { .. } => "CaptureFailed",
            SyncEvent::MatcherFailed { .. } => "MatcherFailed",
        }
    }
}

/// Broadcast bus for sync events
///
/// Wraps a tokio broadcast channel. Subscribers joining late see only
/// events emitted after subscription; slow subscribers lag and drop the
/// oldest buffered events rather than blocking the emitter.
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Returns a receiver that will receive all events emitted after
    /// subscription. Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: SyncEvent) -> Result<usize, broadcast::error::SendError<SyncEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// The engine keeps running whether or not anyone observes it, so all
    /// engine-side emission goes through this.
    pub fn emit_lossy(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    ///
    /// Useful for debugging and monitoring
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
