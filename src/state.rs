//! Shared service state
//!
//! The engine is the single writer: it publishes an immutable
//! [`StatusSnapshot`] after every state change and emits events on the
//! bus. Everything else (HTTP handlers, SSE) only ever reads snapshots
//! or subscribes, so observers can never mutate cycle state.

use crate::events::{EventBus, SyncEvent};
use crate::sync::controller::SeekDecision;
use crate::sync::cycle::CyclePhase;
use crate::sync::latency::LatencyReport;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// The last accepted match, as shown to observers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchSummary {
    pub media_id: Uuid,
    pub title: Option<String>,
    pub reference_offset_seconds: f64,
    /// Latency-compensated theater time computed for this match
    pub target_seconds: f64,
    pub matched_at: chrono::DateTime<chrono::Utc>,
}

/// Immutable view of the sync engine at one instant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub phase: CyclePhase,
    /// Accepted matches since the session started
    pub match_count: u32,
    pub session_started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub auto_cycle: bool,
    pub last_match: Option<MatchSummary>,
    pub last_decision: Option<SeekDecision>,
    pub latency: LatencyReport,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl StatusSnapshot {
    /// Snapshot of a freshly started service: idle, nothing measured
    pub fn initial(auto_cycle: bool, latency_history_capacity: usize) -> Self {
        Self {
            phase: CyclePhase::Idle,
            match_count: 0,
            session_started_at: None,
            auto_cycle,
            last_match: None,
            last_decision: None,
            latency: LatencyReport {
                samples: Vec::new(),
                capacity: latency_history_capacity,
                average_match_to_seek: None,
                last_match_to_seek: None,
                last_round_trip: None,
                last_end_to_end: None,
                performance_good: None,
            },
            updated_at: chrono::Utc::now(),
        }
    }
}

/// State shared between the engine and the API layer
pub struct SharedState {
    snapshot: RwLock<StatusSnapshot>,
    events: EventBus,
}

impl SharedState {
    pub fn new(event_capacity: usize, initial: StatusSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(initial),
            events: EventBus::new(event_capacity),
        }
    }

    /// Current snapshot, cloned out so readers hold no lock
    pub async fn snapshot(&self) -> StatusSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Replace the published snapshot (engine only)
    pub async fn publish(&self, snapshot: StatusSnapshot) {
        *self.snapshot.write().await = snapshot;
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Emit without caring whether anyone listens
    pub fn emit(&self, event: SyncEvent) {
        self.events.emit_lossy(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initial_snapshot_is_idle() {
        let state = SharedState::new(16, StatusSnapshot::initial(true, 20));
        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.phase, CyclePhase::Idle);
        assert_eq!(snapshot.match_count, 0);
        assert!(snapshot.last_match.is_none());
        assert_eq!(snapshot.latency.capacity, 20);
    }

    #[tokio::test]
    async fn test_publish_replaces_snapshot() {
        let state = SharedState::new(16, StatusSnapshot::initial(true, 20));

        let mut updated = state.snapshot().await;
        updated.phase = CyclePhase::Listening;
        updated.match_count = 3;
        state.publish(updated).await;

        let read_back = state.snapshot().await;
        assert_eq!(read_back.phase, CyclePhase::Listening);
        assert_eq!(read_back.match_count, 3);
    }

    #[tokio::test]
    async fn test_emitted_events_reach_subscribers() {
        let state = SharedState::new(16, StatusSnapshot::initial(true, 20));
        let mut rx = state.subscribe();

        state.emit(SyncEvent::CaptureFailed {
            error: "no device".to_string(),
            timestamp: chrono::Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "CaptureFailed");
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = StatusSnapshot::initial(false, 20);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"phase\":\"idle\""));
        assert!(json.contains("\"auto_cycle\":false"));
    }
}
