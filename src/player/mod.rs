//! Playback device contract
//!
//! The sync engine never talks to a concrete player; it holds a
//! [`PlaybackDevice`] and asks for the position, issues seeks, and toggles
//! transport. Production uses the HTTP adapter against a local player
//! process; tests and demos use the in-process simulated player.

pub mod http;
pub mod simulated;

pub use http::HttpPlayer;
pub use simulated::SimulatedPlayer;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Instant;

/// Confirmation that a seek landed
///
/// Stamped the moment the device acknowledged the new position, on both
/// clock domains: monotonic for round-trip latency math, wall for event
/// timestamps.
#[derive(Debug, Clone, Copy)]
pub struct SeekAck {
    pub completed_at: Instant,
    pub completed_wall: chrono::DateTime<chrono::Utc>,
}

impl SeekAck {
    pub fn now() -> Self {
        Self {
            completed_at: Instant::now(),
            completed_wall: chrono::Utc::now(),
        }
    }
}

/// A controllable local player
///
/// Positions are seconds into the current media. Implementations must be
/// safe to share across tasks; the engine calls them from its own task and
/// the API layer never touches them directly.
#[async_trait]
pub trait PlaybackDevice: Send + Sync {
    /// Current playback position in seconds
    async fn position(&self) -> Result<f64>;

    /// Seek to an absolute position in seconds, returning when the device
    /// acknowledged it
    async fn seek(&self, to_seconds: f64) -> Result<SeekAck>;

    /// Resume playback
    async fn play(&self) -> Result<()>;

    /// Pause playback
    async fn pause(&self) -> Result<()>;

    /// Whether the device is currently playing
    async fn is_playing(&self) -> Result<bool>;
}
