//! Sync cycle state machine
//!
//! The cycle moves Idle -> Listening -> Paused(n) -> Listening -> ... and
//! accepts at most one match per listening phase. Transitions are driven
//! entirely by explicit inputs (start, stop, match acceptance, 1-second
//! ticks), so the machine is deterministic and testable without timers.
//!
//! The machine owns no I/O. Acquiring and releasing capture streams and
//! matcher sessions happens in the engine around these transitions.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Externally visible cycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum CyclePhase {
    /// No session active; all collaborators released
    Idle,
    /// Capturing ambient audio and forwarding frames to the matcher
    Listening,
    /// Between listening phases; counts down whole seconds
    Paused { remaining_secs: u32 },
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CyclePhase::Idle => write!(f, "idle"),
            CyclePhase::Listening => write!(f, "listening"),
            CyclePhase::Paused { remaining_secs } => write!(f, "paused({})", remaining_secs),
        }
    }
}

/// One listening phase
///
/// The wall-clock start feeds elapsed-time math (how long since the
/// matched audio was heard). Latency measurements live on the monotonic
/// stamps carried by frames and seek marks, never on the session.
#[derive(Debug, Clone, Copy)]
pub struct ListeningSession {
    pub started_wall: chrono::DateTime<chrono::Utc>,
    pub has_matched: bool,
}

impl ListeningSession {
    fn new(started_wall: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            started_wall,
            has_matched: false,
        }
    }
}

/// Result of accepting a match report
#[derive(Debug, Clone)]
pub struct AcceptedMatch {
    /// The session that produced the match, captured before teardown
    pub session: ListeningSession,
    /// Accepted matches since start(), including this one
    pub match_count: u32,
    pub previous_phase: CyclePhase,
    pub next_phase: CyclePhase,
}

/// Effect of a 1-second tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickEffect {
    /// Nothing to do (Idle or Listening)
    None,
    /// Pause countdown advanced
    CountedDown { remaining_secs: u32 },
    /// Pause expired; the engine should re-enter Listening
    ResumeListening,
}

/// Deterministic cycle state machine
#[derive(Debug)]
pub struct CycleStateMachine {
    phase: CyclePhase,
    session: Option<ListeningSession>,
    match_count: u32,
    pause_duration_secs: u32,
    auto_cycle: bool,
}

impl CycleStateMachine {
    pub fn new(pause_duration_secs: u32, auto_cycle: bool) -> Self {
        Self {
            phase: CyclePhase::Idle,
            session: None,
            match_count: 0,
            pause_duration_secs,
            auto_cycle,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn session(&self) -> Option<&ListeningSession> {
        self.session.as_ref()
    }

    pub fn match_count(&self) -> u32 {
        self.match_count
    }

    pub fn is_idle(&self) -> bool {
        self.phase == CyclePhase::Idle
    }

    pub fn is_listening(&self) -> bool {
        self.phase == CyclePhase::Listening
    }

    /// Start a sync session from Idle
    ///
    /// Resets the match counter and enters Listening. Starting while a
    /// session is active is a no-op and returns false.
    pub fn start(&mut self, now_wall: chrono::DateTime<chrono::Utc>) -> bool {
        if self.phase != CyclePhase::Idle {
            return false;
        }
        self.match_count = 0;
        self.begin_listening(now_wall);
        true
    }

    /// Enter a listening phase with a fresh session
    ///
    /// Used by start() and by the engine when a pause expires. The match
    /// counter is left alone; only start() resets it.
    pub fn begin_listening(&mut self, now_wall: chrono::DateTime<chrono::Utc>) {
        self.session = Some(ListeningSession::new(now_wall));
        self.phase = CyclePhase::Listening;
    }

    /// Accept a match report for the current listening phase
    ///
    /// At most one match is accepted per phase. On acceptance the phase
    /// ends immediately: into the pause countdown when auto-cycle is on,
    /// back to Idle otherwise.
    pub fn accept_match(&mut self) -> Result<AcceptedMatch> {
        if self.phase != CyclePhase::Listening {
            return Err(Error::InvalidState(format!(
                "match report arrived while {}",
                self.phase
            )));
        }
        let session = match self.session.as_mut() {
            Some(s) => {
                if s.has_matched {
                    return Err(Error::InvalidState(
                        "listening phase already accepted a match".to_string(),
                    ));
                }
                s.has_matched = true;
                *s
            }
            None => {
                return Err(Error::InvalidState(
                    "listening phase has no session".to_string(),
                ));
            }
        };

        self.match_count += 1;
        let previous_phase = self.phase;
        let next_phase = if self.auto_cycle {
            self.enter_pause()
        } else {
            self.to_idle()
        };

        Ok(AcceptedMatch {
            session,
            match_count: self.match_count,
            previous_phase,
            next_phase,
        })
    }

    /// Leave Listening into the pause countdown
    ///
    /// Also used by the engine when a matcher session dies mid-phase and
    /// auto-cycle should retry after the usual pause.
    pub fn enter_pause(&mut self) -> CyclePhase {
        self.session = None;
        self.phase = CyclePhase::Paused {
            remaining_secs: self.pause_duration_secs,
        };
        self.phase
    }

    /// Advance the pause countdown by one second
    pub fn tick(&mut self) -> TickEffect {
        match self.phase {
            CyclePhase::Paused { remaining_secs } if remaining_secs > 1 => {
                self.phase = CyclePhase::Paused {
                    remaining_secs: remaining_secs - 1,
                };
                TickEffect::CountedDown {
                    remaining_secs: remaining_secs - 1,
                }
            }
            CyclePhase::Paused { .. } => TickEffect::ResumeListening,
            _ => TickEffect::None,
        }
    }

    /// Stop the session immediately from any state
    ///
    /// Cancels a running pause countdown. Returns the phase that was
    /// abandoned so the engine can report the transition.
    pub fn stop(&mut self) -> CyclePhase {
        let previous = self.phase;
        self.to_idle();
        previous
    }

    fn to_idle(&mut self) -> CyclePhase {
        self.session = None;
        self.phase = CyclePhase::Idle;
        self.phase
    }

    pub fn auto_cycle(&self) -> bool {
        self.auto_cycle
    }
}
