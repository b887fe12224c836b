//! Sync cycle core
//!
//! One task owns all cycle and timing state (see [`engine`]); the other
//! modules are the pieces it drives: the deterministic state machine,
//! the theater time estimator, the seek decision controller, and the
//! latency tracker.

pub mod controller;
pub mod cycle;
pub mod engine;
pub mod estimator;
pub mod latency;

pub use controller::{decide, SeekDecision, SyncController, SyncOutcome};
pub use cycle::{CyclePhase, CycleStateMachine, ListeningSession, TickEffect};
pub use engine::{SyncEngine, SyncEngineHandle};
pub use estimator::{LatencySnapshot, TheaterTimeEstimate, TheaterTimeEstimator};
pub use latency::{LatencyHistory, LatencyReport, LatencyTracker};
