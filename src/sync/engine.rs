//! Sync engine orchestrator
//!
//! A single tokio task owns the state machine, the latency tracker and
//! the live capture/matcher pipeline. Commands, match outcomes and the
//! 1-second tick all funnel into its select loop, so every mutation of
//! cycle state happens on one task and needs no locking.
//!
//! Per listening phase the engine opens a fresh matcher session, wires a
//! frame sink into the capture backend, and tears both down the moment
//! the phase ends. A shared atomic gate cuts frame forwarding instantly
//! on match acceptance; whatever the matcher still had queued dies with
//! its channel.

use crate::audio::{CaptureSource, CaptureStream, FrameSink};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::events::SyncEvent;
use crate::matching::{MatchOutcome, MatchReport, MatcherSession, MatchingEngine};
use crate::player::PlaybackDevice;
use crate::state::{MatchSummary, SharedState, StatusSnapshot};
use crate::sync::controller::{SeekDecision, SyncController, SyncOutcome};
use crate::sync::cycle::{CyclePhase, CycleStateMachine, TickEffect};
use crate::sync::estimator::{LatencySnapshot, TheaterTimeEstimator};
use crate::sync::latency::LatencyTracker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

/// Commands accepted by the engine task
pub enum EngineCommand {
    Start {
        reply: oneshot::Sender<Result<CyclePhase>>,
    },
    Stop {
        reply: oneshot::Sender<CyclePhase>,
    },
}

/// Cheap, cloneable handle to a running engine
#[derive(Clone)]
pub struct SyncEngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
}

impl SyncEngineHandle {
    /// Start a sync session; no-op (returning the current phase) when one
    /// is already active. Fails when the capture device or matcher cannot
    /// be acquired, in which case the engine stays idle.
    pub async fn start(&self) -> Result<CyclePhase> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCommand::Start { reply })
            .await
            .map_err(|_| Error::Internal("sync engine is not running".to_string()))?;
        rx.await
            .map_err(|_| Error::Internal("sync engine dropped the start request".to_string()))?
    }

    /// Stop the session immediately from any state
    pub async fn stop(&self) -> Result<CyclePhase> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCommand::Stop { reply })
            .await
            .map_err(|_| Error::Internal("sync engine is not running".to_string()))?;
        rx.await
            .map_err(|_| Error::Internal("sync engine dropped the stop request".to_string()))
    }
}

/// Live capture/matcher pair for one listening phase
///
/// Field order matters for drop: the capture stream goes first so frames
/// stop flowing before the matcher session aborts its worker.
struct ListenPipeline {
    capture: Box<dyn CaptureStream>,
    session: MatcherSession,
    gate: Arc<AtomicBool>,
}

/// The engine task state; consumed by [`run`](Self::run)
pub struct SyncEngine {
    cmd_rx: mpsc::Receiver<EngineCommand>,
    machine: CycleStateMachine,
    estimator: TheaterTimeEstimator,
    controller: SyncController,
    tracker: LatencyTracker,
    latencies: LatencySnapshot,
    capture: Arc<dyn CaptureSource>,
    matcher: Arc<dyn MatchingEngine>,
    shared: Arc<SharedState>,
    pipeline: Option<ListenPipeline>,
    last_match: Option<MatchSummary>,
    last_decision: Option<SeekDecision>,
}

impl SyncEngine {
    pub fn new(
        config: &SyncConfig,
        capture: Arc<dyn CaptureSource>,
        matcher: Arc<dyn MatchingEngine>,
        player: Arc<dyn PlaybackDevice>,
        shared: Arc<SharedState>,
    ) -> (Self, SyncEngineHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let engine = Self {
            cmd_rx,
            machine: CycleStateMachine::new(
                config.timing.pause_duration_secs,
                config.timing.auto_cycle,
            ),
            estimator: TheaterTimeEstimator::new(
                config.timing.safety_margin_factor,
                Duration::from_secs_f64(config.timing.safety_margin_floor),
            ),
            controller: SyncController::new(player, config.timing.sync_threshold),
            tracker: LatencyTracker::new(
                config.latency.history_capacity,
                config.max_latency_sample(),
                config.health_threshold(),
            ),
            latencies: LatencySnapshot::from_defaults(&config.latency),
            capture,
            matcher,
            shared,
            pipeline: None,
            last_match: None,
            last_decision: None,
        };
        (engine, SyncEngineHandle { cmd_tx })
    }

    /// Build and spawn an engine, returning its handle
    pub fn spawn(
        config: &SyncConfig,
        capture: Arc<dyn CaptureSource>,
        matcher: Arc<dyn MatchingEngine>,
        player: Arc<dyn PlaybackDevice>,
        shared: Arc<SharedState>,
    ) -> SyncEngineHandle {
        let (engine, handle) = Self::new(config, capture, matcher, player, shared);
        tokio::spawn(engine.run());
        handle
    }

    /// Run until every handle is gone
    pub async fn run(mut self) {
        info!("Sync engine running");
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe_cmd = self.cmd_rx.recv() => {
                    match maybe_cmd {
                        Some(EngineCommand::Start { reply }) => {
                            let result = self.handle_start().await;
                            let _ = reply.send(result);
                        }
                        Some(EngineCommand::Stop { reply }) => {
                            let phase = self.handle_stop().await;
                            let _ = reply.send(phase);
                        }
                        None => {
                            self.handle_stop().await;
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.handle_tick().await;
                }
                outcome = Self::next_outcome(&mut self.pipeline) => {
                    self.handle_outcome(outcome).await;
                }
            }
        }
        info!("Sync engine stopped");
    }

    /// Next matcher outcome, or never when no phase is listening
    async fn next_outcome(pipeline: &mut Option<ListenPipeline>) -> Option<MatchOutcome> {
        match pipeline.as_mut() {
            Some(p) => p.session.recv().await,
            None => std::future::pending().await,
        }
    }

    async fn handle_start(&mut self) -> Result<CyclePhase> {
        if !self.machine.is_idle() {
            debug!(phase = %self.machine.phase(), "Start requested while active, ignoring");
            return Ok(self.machine.phase());
        }

        match self.open_pipeline() {
            Ok(()) => {
                let old = self.machine.phase();
                self.machine.start(chrono::Utc::now());
                info!("Sync session started, listening for a match");
                self.emit_state_change(old).await;
                Ok(self.machine.phase())
            }
            Err(e) => {
                error!("Failed to start listening: {}", e);
                self.emit_acquisition_failure(&e);
                self.publish_snapshot().await;
                Err(e)
            }
        }
    }

    async fn handle_stop(&mut self) -> CyclePhase {
        self.teardown_pipeline();
        self.tracker.abandon();
        let previous = self.machine.stop();
        if previous != CyclePhase::Idle {
            info!(from = %previous, "Sync session stopped");
            self.emit_state_change(previous).await;
        }
        self.machine.phase()
    }

    async fn handle_tick(&mut self) {
        let old = self.machine.phase();
        match self.machine.tick() {
            TickEffect::None => {}
            TickEffect::CountedDown { remaining_secs } => {
                debug!(remaining_secs, "Pause countdown");
                self.emit_state_change(old).await;
            }
            TickEffect::ResumeListening => {
                self.resume_listening(old).await;
            }
        }
    }

    async fn resume_listening(&mut self, old: CyclePhase) {
        match self.open_pipeline() {
            Ok(()) => {
                self.machine.begin_listening(chrono::Utc::now());
                debug!("Pause expired, listening again");
                self.emit_state_change(old).await;
            }
            Err(e) => {
                error!("Failed to resume listening, stopping session: {}", e);
                self.emit_acquisition_failure(&e);
                self.machine.stop();
                self.emit_state_change(old).await;
            }
        }
    }

    async fn handle_outcome(&mut self, outcome: Option<MatchOutcome>) {
        match outcome {
            Some(MatchOutcome::Match(report)) => self.handle_match(report).await,
            Some(MatchOutcome::NoMatch { reason }) => {
                debug!(?reason, "Frame produced no match");
                self.shared.emit(SyncEvent::NoMatchReported {
                    reason,
                    timestamp: chrono::Utc::now(),
                });
            }
            None => self.handle_matcher_closed().await,
        }
    }

    async fn handle_match(&mut self, report: MatchReport) {
        let received_at = Instant::now();
        let received_wall = chrono::Utc::now();

        let accepted = match self.machine.accept_match() {
            Ok(a) => a,
            Err(e) => {
                debug!("Discarding match report: {}", e);
                self.shared.emit(SyncEvent::MatchDiscarded {
                    reason: e.to_string(),
                    timestamp: received_wall,
                });
                return;
            }
        };

        // Phase is over: gate closes, capture and matcher go away
        self.teardown_pipeline();
        self.tracker.mark_match_received(received_at);

        // Fold fresh measurements into the latency assumptions
        if let Some(submitted) = report.submitted_at {
            if let Some(delay) = received_at.checked_duration_since(submitted) {
                self.latencies.processing_delay = delay;
            }
        }
        if let Some(round_trip) = self.tracker.last_round_trip() {
            self.latencies.player_seek_delay = round_trip;
        }

        info!(
            offset = report.reference_offset_seconds,
            match_count = accepted.match_count,
            "Match accepted"
        );
        self.shared.emit(SyncEvent::MatchAccepted {
            media_id: report.media_id,
            title: report.title.clone(),
            reference_offset_seconds: report.reference_offset_seconds,
            match_count: accepted.match_count,
            timestamp: received_wall,
        });

        let estimate = match self.estimator.estimate(
            report.reference_offset_seconds,
            Some(&accepted.session),
            received_wall,
            &self.latencies,
        ) {
            Ok(e) => e,
            Err(e) => {
                error!("Theater time estimate failed: {}", e);
                self.tracker.abandon();
                self.emit_state_change(accepted.previous_phase).await;
                return;
            }
        };

        debug!(
            target_seconds = estimate.target,
            elapsed = estimate.elapsed,
            processing = estimate.processing_delay,
            pipeline = estimate.pipeline_delay,
            margin = estimate.safety_margin,
            "Theater time estimated"
        );

        self.last_match = Some(MatchSummary {
            media_id: report.media_id,
            title: report.title,
            reference_offset_seconds: report.reference_offset_seconds,
            target_seconds: estimate.target,
            matched_at: received_wall,
        });
        self.emit_state_change(accepted.previous_phase).await;

        self.apply_sync_decision(estimate.target).await;
        self.publish_snapshot().await;
    }

    async fn apply_sync_decision(&mut self, target_seconds: f64) {
        match self.controller.apply(target_seconds).await {
            Ok(SyncOutcome::InSync(decision)) => {
                self.tracker.abandon();
                self.last_decision = Some(decision);
                self.shared.emit(SyncEvent::SeekSkipped {
                    target_seconds: decision.target_seconds,
                    player_position_seconds: decision.player_position_seconds,
                    difference_seconds: decision.difference_seconds,
                    timestamp: chrono::Utc::now(),
                });
            }
            Ok(SyncOutcome::Seeked {
                decision,
                issued_at,
                ack,
            }) => {
                self.last_decision = Some(decision);
                self.tracker.mark_seek_issued(issued_at);
                self.shared.emit(SyncEvent::SeekIssued {
                    target_seconds: decision.target_seconds,
                    player_position_seconds: decision.player_position_seconds,
                    difference_seconds: decision.difference_seconds,
                    timestamp: chrono::Utc::now(),
                });

                if let Some(completed) = self.tracker.mark_seek_completed(ack.completed_at) {
                    self.shared.emit(SyncEvent::SeekCompleted {
                        target_seconds: decision.target_seconds,
                        round_trip_seconds: completed.round_trip.as_secs_f64(),
                        end_to_end_seconds: completed.end_to_end.map(|d| d.as_secs_f64()),
                        performance_good: completed.performance_good,
                        timestamp: ack.completed_wall,
                    });
                }
            }
            Ok(SyncOutcome::SeekInProgress(decision)) => {
                self.tracker.abandon();
                self.last_decision = Some(decision);
            }
            Err(e) => {
                // Local to this match; the cycle goes on
                error!("Sync decision failed: {}", e);
                self.tracker.abandon();
            }
        }
    }

    async fn handle_matcher_closed(&mut self) {
        if self.pipeline.is_none() {
            return;
        }
        error!("Matcher session closed unexpectedly");
        self.teardown_pipeline();
        self.shared.emit(SyncEvent::MatcherFailed {
            error: "matcher session closed unexpectedly".to_string(),
            timestamp: chrono::Utc::now(),
        });

        let old = self.machine.phase();
        if self.machine.auto_cycle() && self.machine.is_listening() {
            // Retry after the usual pause
            self.machine.enter_pause();
        } else {
            self.machine.stop();
        }
        self.emit_state_change(old).await;
    }

    fn open_pipeline(&mut self) -> Result<()> {
        let session = self.matcher.begin_session()?;
        let gate = Arc::new(AtomicBool::new(true));
        let sink = FrameSink::new(session.frame_sender(), gate.clone());
        let capture = self.capture.open(sink)?;

        let hints = capture.latency();
        if let Some(delay) = hints.input_buffer {
            self.latencies.input_buffer_delay = delay;
        }
        if let Some(delay) = hints.device_input {
            self.latencies.device_input_latency = delay;
        }

        self.pipeline = Some(ListenPipeline {
            capture,
            session,
            gate,
        });
        Ok(())
    }

    fn teardown_pipeline(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.gate.store(false, Ordering::Release);
            // Drop releases the capture device, then aborts the matcher worker
            drop(pipeline);
        }
    }

    fn emit_acquisition_failure(&self, error: &Error) {
        let event = match error {
            Error::Matcher(_) => SyncEvent::MatcherFailed {
                error: error.to_string(),
                timestamp: chrono::Utc::now(),
            },
            _ => SyncEvent::CaptureFailed {
                error: error.to_string(),
                timestamp: chrono::Utc::now(),
            },
        };
        self.shared.emit(event);
    }

    async fn emit_state_change(&mut self, old_state: CyclePhase) {
        let new_state = self.machine.phase();
        if old_state != new_state {
            self.shared.emit(SyncEvent::CycleStateChanged {
                old_state,
                new_state,
                match_count: self.machine.match_count(),
                timestamp: chrono::Utc::now(),
            });
        }
        self.publish_snapshot().await;
    }

    async fn publish_snapshot(&self) {
        let snapshot = StatusSnapshot {
            phase: self.machine.phase(),
            match_count: self.machine.match_count(),
            session_started_at: self.machine.session().map(|s| s.started_wall),
            auto_cycle: self.machine.auto_cycle(),
            last_match: self.last_match.clone(),
            last_decision: self.last_decision,
            latency: self.tracker.report(),
            updated_at: chrono::Utc::now(),
        };
        self.shared.publish(snapshot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SyntheticCapture;
    use crate::matching::ScriptedMatcher;
    use crate::player::SimulatedPlayer;

    fn test_config() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.timing.pause_duration_secs = 1;
        config.matcher.scripted_frames_until_match = 2;
        config
    }

    fn spawn_engine(config: &SyncConfig) -> (SyncEngineHandle, Arc<SharedState>) {
        let shared = Arc::new(SharedState::new(
            64,
            StatusSnapshot::initial(config.timing.auto_cycle, config.latency.history_capacity),
        ));
        let capture = Arc::new(SyntheticCapture::with_cadence(
            44100,
            64,
            Duration::from_millis(2),
        ));
        let matcher = Arc::new(ScriptedMatcher::from_config(&config.matcher));
        let player = Arc::new(SimulatedPlayer::new(0.0, true, Duration::from_millis(1)));
        let handle = SyncEngine::spawn(config, capture, matcher, player, shared.clone());
        (handle, shared)
    }

    // The engine future moves onto the runtime's worker threads; this
    // fails to compile if any engine field stops being Send + Sync.
    #[test]
    fn test_run_future_is_send() {
        fn assert_send<F: std::future::Future + Send>(_: &F) {}

        let config = test_config();
        let shared = Arc::new(SharedState::new(
            64,
            StatusSnapshot::initial(config.timing.auto_cycle, config.latency.history_capacity),
        ));
        let capture: Arc<dyn CaptureSource> = Arc::new(SyntheticCapture::new(44100, 64));
        let matcher: Arc<dyn MatchingEngine> = Arc::new(ScriptedMatcher::from_config(&config.matcher));
        let player: Arc<dyn PlaybackDevice> = Arc::new(SimulatedPlayer::new(0.0, true, Duration::ZERO));
        let (engine, _handle) = SyncEngine::new(&config, capture, matcher, player, shared);
        assert_send(&engine.run());
    }

    #[tokio::test]
    async fn test_start_enters_listening() {
        let config = test_config();
        let (handle, shared) = spawn_engine(&config);

        let phase = handle.start().await.unwrap();
        assert_eq!(phase, CyclePhase::Listening);
        assert_eq!(shared.snapshot().await.phase, CyclePhase::Listening);
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let config = test_config();
        let (handle, _shared) = spawn_engine(&config);

        handle.start().await.unwrap();
        let phase = handle.start().await.unwrap();
        assert_eq!(phase, CyclePhase::Listening);
    }

    #[tokio::test]
    async fn test_stop_returns_to_idle() {
        let config = test_config();
        let (handle, shared) = spawn_engine(&config);

        handle.start().await.unwrap();
        let phase = handle.stop().await.unwrap();
        assert_eq!(phase, CyclePhase::Idle);
        let snapshot = shared.snapshot().await;
        assert_eq!(snapshot.phase, CyclePhase::Idle);
        assert!(snapshot.session_started_at.is_none());
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_harmless() {
        let config = test_config();
        let (handle, _shared) = spawn_engine(&config);
        assert_eq!(handle.stop().await.unwrap(), CyclePhase::Idle);
    }
}
