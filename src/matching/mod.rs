//! Matching engine contract
//!
//! The matcher is an opaque capability: the engine opens a session, feeds
//! it frames, and reads outcomes. What catalog it matches against and how
//! is the backend's business, configured at construction. Fingerprinting
//! itself lives behind this seam.

pub mod scripted;

pub use scripted::ScriptedMatcher;

use crate::audio::AudioFrame;
use crate::error::Result;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A match against the reference catalog
#[derive(Debug, Clone)]
pub struct MatchReport {
    pub media_id: Uuid,
    pub title: Option<String>,
    /// Where the matched audio sits in the reference soundtrack (seconds)
    pub reference_offset_seconds: f64,
    /// When the producing frame entered the matcher, for measuring the
    /// processing delay against the engine's receive time
    pub submitted_at: Option<Instant>,
}

/// One result from the matcher
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Match(MatchReport),
    /// Frame analyzed, nothing recognized. Normal, not an error.
    NoMatch { reason: Option<String> },
}

/// A live matching session
///
/// Frames go in through cloned senders (the engine wires one into the
/// frame sink), outcomes come out through [`recv`](Self::recv). Dropping
/// the session aborts the backend worker, so nothing outlives the
/// listening phase that created it.
pub struct MatcherSession {
    frames: mpsc::Sender<AudioFrame>,
    outcomes: mpsc::Receiver<MatchOutcome>,
    worker: JoinHandle<()>,
}

impl MatcherSession {
    pub fn new(
        frames: mpsc::Sender<AudioFrame>,
        outcomes: mpsc::Receiver<MatchOutcome>,
        worker: JoinHandle<()>,
    ) -> Self {
        Self {
            frames,
            outcomes,
            worker,
        }
    }

    /// Sender to wire into the capture sink
    pub fn frame_sender(&self) -> mpsc::Sender<AudioFrame> {
        self.frames.clone()
    }

    /// Next outcome; `None` means the session ended
    pub async fn recv(&mut self) -> Option<MatchOutcome> {
        self.outcomes.recv().await
    }
}

impl Drop for MatcherSession {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

/// A matching engine backend
///
/// `begin_session` spawns the backend's worker on the current tokio
/// runtime; the engine calls it on every transition into Listening.
pub trait MatchingEngine: Send + Sync {
    fn begin_session(&self) -> Result<MatcherSession>;
}
