//! Audio frame type shared by capture and matching

use std::time::{Duration, Instant};

/// One mono frame of captured ambient audio
///
/// Timestamps use both clock domains deliberately: `captured_at` feeds
/// latency math (monotonic), `captured_wall` is for human-facing
/// diagnostics only. `submitted_at` is stamped by the frame sink at the
/// moment the frame is handed to the matching engine, so the matcher's
/// processing delay can be measured against it.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub captured_at: Instant,
    pub captured_wall: chrono::DateTime<chrono::Utc>,
    pub submitted_at: Option<Instant>,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            captured_at: Instant::now(),
            captured_wall: chrono::Utc::now(),
            submitted_at: None,
        }
    }

    /// Audible duration covered by this frame
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
