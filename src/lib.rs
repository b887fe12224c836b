//! # cuesync
//!
//! Ambient audio sync service. Captures theater audio from a microphone,
//! identifies where it sits in the reference soundtrack, estimates the
//! latency-compensated live position, and seeks a local media player to
//! match.
//!
//! **Architecture:** a single engine task owns the Listen -> Match -> Sync
//! cycle; HTTP/SSE observers read published snapshots and send commands.

pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod matching;
pub mod player;
pub mod state;
pub mod sync;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use state::SharedState;
