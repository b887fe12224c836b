//! Sync decision and seek issuance
//!
//! Compares the estimated theater time with the player's actual position
//! and seeks only when the drift exceeds the configured threshold. Small
//! drift is normal; constant seeking is worse than 50ms of offset, so a
//! difference exactly at the threshold stays put.

use crate::error::Result;
use crate::player::{PlaybackDevice, SeekAck};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// One comparison of target vs. player position
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SeekDecision {
    pub target_seconds: f64,
    pub player_position_seconds: f64,
    /// target - player position; positive means the player is behind
    pub difference_seconds: f64,
    pub should_seek: bool,
}

/// Decide whether drift warrants a seek
///
/// Pure function: seek exactly when `|target - position|` exceeds the
/// threshold. The boundary itself does not seek.
pub fn decide(target_seconds: f64, player_position_seconds: f64, threshold_seconds: f64) -> SeekDecision {
    let difference_seconds = target_seconds - player_position_seconds;
    SeekDecision {
        target_seconds,
        player_position_seconds,
        difference_seconds,
        should_seek: difference_seconds.abs() > threshold_seconds,
    }
}

/// What applying a sync decision did
#[derive(Debug, Clone, Copy)]
pub enum SyncOutcome {
    /// Within threshold; player untouched
    InSync(SeekDecision),
    /// Drift exceeded the threshold and a seek completed
    Seeked {
        decision: SeekDecision,
        /// When the seek command left, for round-trip measurement
        issued_at: Instant,
        ack: SeekAck,
    },
    /// A previous seek was still outstanding; this trigger was dropped
    SeekInProgress(SeekDecision),
}

/// Applies sync decisions to a playback device
///
/// Seek issuance is serialized: while one seek is outstanding, further
/// triggers are dropped rather than queued, so the player never receives
/// overlapping position commands.
pub struct SyncController {
    player: Arc<dyn PlaybackDevice>,
    threshold_seconds: f64,
    seek_in_flight: AtomicBool,
}

impl SyncController {
    pub fn new(player: Arc<dyn PlaybackDevice>, threshold_seconds: f64) -> Self {
        Self {
            player,
            threshold_seconds,
            seek_in_flight: AtomicBool::new(false),
        }
    }

    pub fn threshold_seconds(&self) -> f64 {
        self.threshold_seconds
    }

    /// Compare the target against the live player position and seek if
    /// the drift warrants it
    pub async fn apply(&self, target_seconds: f64) -> Result<SyncOutcome> {
        let position = self.player.position().await?;
        let decision = decide(target_seconds, position, self.threshold_seconds);

        if !decision.should_seek {
            debug!(
                target = decision.target_seconds,
                position = decision.player_position_seconds,
                difference = decision.difference_seconds,
                "Player within threshold, no seek"
            );
            return Ok(SyncOutcome::InSync(decision));
        }

        if self.seek_in_flight.swap(true, Ordering::SeqCst) {
            warn!(
                target = decision.target_seconds,
                "Seek already in flight, dropping trigger"
            );
            return Ok(SyncOutcome::SeekInProgress(decision));
        }

        debug!(
            target = decision.target_seconds,
            position = decision.player_position_seconds,
            difference = decision.difference_seconds,
            "Drift exceeds threshold, seeking"
        );

        let issued_at = Instant::now();
        let result = self.player.seek(target_seconds).await;
        self.seek_in_flight.store(false, Ordering::SeqCst);

        let ack = result?;
        Ok(SyncOutcome::Seeked {
            decision,
            issued_at,
            ack,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::SimulatedPlayer;
    use std::time::Duration;

    #[test]
    fn test_decide_within_threshold_does_not_seek() {
        let decision = decide(10.05, 10.00, 0.08);
        assert!(!decision.should_seek);
        assert!((decision.difference_seconds - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_decide_beyond_threshold_seeks() {
        let decision = decide(10.15, 10.00, 0.08);
        assert!(decision.should_seek);
        assert!((decision.difference_seconds - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_decide_exactly_at_threshold_does_not_seek() {
        // Exactly representable values so the difference lands on the threshold
        let decision = decide(10.125, 10.0, 0.125);
        assert_eq!(decision.difference_seconds, 0.125);
        assert!(!decision.should_seek);
    }

    #[test]
    fn test_decide_player_ahead_uses_absolute_difference() {
        let decision = decide(10.00, 10.50, 0.08);
        assert!(decision.should_seek);
        assert!(decision.difference_seconds < 0.0);
    }

    #[test]
    fn test_decide_is_deterministic() {
        let a = decide(42.5, 41.0, 0.08);
        let b = decide(42.5, 41.0, 0.08);
        assert_eq!(a.should_seek, b.should_seek);
        assert_eq!(a.target_seconds, b.target_seconds);
        assert_eq!(a.player_position_seconds, b.player_position_seconds);
        assert_eq!(a.difference_seconds, b.difference_seconds);
    }

    #[tokio::test]
    async fn test_apply_in_sync_leaves_player_alone() {
        let player = Arc::new(SimulatedPlayer::new(100.0, false, Duration::ZERO));
        let controller = SyncController::new(player.clone(), 0.08);

        let outcome = controller.apply(100.05).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::InSync(_)));
        assert_eq!(player.seek_count().await, 0);
    }

    #[tokio::test]
    async fn test_apply_out_of_sync_issues_single_seek() {
        let player = Arc::new(SimulatedPlayer::new(100.0, false, Duration::ZERO));
        let controller = SyncController::new(player.clone(), 0.08);

        let outcome = controller.apply(102.5).await.unwrap();
        match outcome {
            SyncOutcome::Seeked { decision, .. } => {
                assert!((decision.difference_seconds - 2.5).abs() < 1e-9);
            }
            other => panic!("expected Seeked, got {:?}", other),
        }
        assert_eq!(player.seek_targets().await, vec![102.5]);
    }

    #[tokio::test]
    async fn test_concurrent_triggers_issue_one_seek() {
        let player = Arc::new(SimulatedPlayer::new(0.0, false, Duration::from_millis(50)));
        let controller = Arc::new(SyncController::new(player.clone(), 0.08));

        let a = controller.clone();
        let b = controller.clone();
        let (first, second) = tokio::join!(a.apply(30.0), b.apply(30.0));

        let outcomes = [first.unwrap(), second.unwrap()];
        let seeked = outcomes
            .iter()
            .filter(|o| matches!(o, SyncOutcome::Seeked { .. }))
            .count();
        let dropped = outcomes
            .iter()
            .filter(|o| matches!(o, SyncOutcome::SeekInProgress(_)))
            .count();
        assert_eq!(seeked, 1);
        assert_eq!(dropped, 1);
        assert_eq!(player.seek_count().await, 1);
    }

    #[tokio::test]
    async fn test_in_flight_flag_clears_after_seek() {
        let player = Arc::new(SimulatedPlayer::new(0.0, false, Duration::ZERO));
        let controller = SyncController::new(player.clone(), 0.08);

        controller.apply(10.0).await.unwrap();
        let outcome = controller.apply(20.0).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Seeked { .. }));
        assert_eq!(player.seek_count().await, 2);
    }
}
