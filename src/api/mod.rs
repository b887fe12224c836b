//! REST API for the sync service
//!
//! Exposes sync control, status, latency diagnostics and an SSE event
//! stream. Handlers only read published snapshots and send engine
//! commands; they never touch cycle state directly.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{router, run, AppContext};
