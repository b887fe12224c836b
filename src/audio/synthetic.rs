//! Synthetic capture backend
//!
//! Emits silent frames at a steady cadence. The matcher contract never
//! inspects sample content, so silence is enough to exercise the whole
//! pipeline without a microphone. Tests shrink the cadence to run the
//! cycle at full speed.

use crate::audio::capture::{CaptureLatency, CaptureSource, CaptureStream, FrameSink, PushResult};
use crate::audio::types::AudioFrame;
use crate::error::Result;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Silence generator standing in for a microphone
pub struct SyntheticCapture {
    sample_rate: u32,
    frame_size: usize,
    cadence: Option<Duration>,
}

impl SyntheticCapture {
    /// Emit frames at their natural pace (frame duration)
    pub fn new(sample_rate: u32, frame_size: usize) -> Self {
        Self {
            sample_rate,
            frame_size,
            cadence: None,
        }
    }

    /// Emit frames at a fixed cadence regardless of frame duration
    pub fn with_cadence(sample_rate: u32, frame_size: usize, cadence: Duration) -> Self {
        Self {
            sample_rate,
            frame_size,
            cadence: Some(cadence),
        }
    }
}

impl CaptureSource for SyntheticCapture {
    fn open(&self, sink: FrameSink) -> Result<Box<dyn CaptureStream>> {
        let frame_duration = if self.sample_rate > 0 {
            Duration::from_secs_f64(self.frame_size as f64 / self.sample_rate as f64)
        } else {
            Duration::from_millis(100)
        };
        let cadence = self.cadence.unwrap_or(frame_duration).max(Duration::from_micros(100));
        let sample_rate = self.sample_rate;
        let frame_size = self.frame_size;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cadence);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let frame = AudioFrame::new(vec![0.0; frame_size], sample_rate);
                if sink.push(frame) == PushResult::Closed {
                    debug!("Synthetic capture stopping, matcher gone");
                    break;
                }
            }
        });

        Ok(Box::new(SyntheticStream {
            task,
            latency: CaptureLatency {
                input_buffer: Some(frame_duration),
                device_input: None,
            },
        }))
    }
}

struct SyntheticStream {
    task: JoinHandle<()>,
    latency: CaptureLatency,
}

impl CaptureStream for SyntheticStream {
    fn latency(&self) -> CaptureLatency {
        self.latency
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}
