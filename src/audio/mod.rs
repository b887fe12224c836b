//! Ambient audio capture
//!
//! Frames flow capture -> [`FrameSink`] -> matcher session. The engine
//! owns the sink's gate and the receiving end; capture backends only ever
//! see the sink.

pub mod capture;
pub mod synthetic;
pub mod types;

pub use capture::{CaptureLatency, CaptureSource, CaptureStream, FrameSink, MicCapture, PushResult};
pub use synthetic::SyntheticCapture;
pub use types::AudioFrame;
