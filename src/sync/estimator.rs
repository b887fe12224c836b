//! Theater time estimation
//!
//! A match report tells us where the captured audio sits in the reference
//! soundtrack. By the time a seek lands, the theater has moved on: the
//! matched frames aged while the matcher chewed on them, and the seek
//! itself takes time. The estimator compensates:
//!
//! ```text
//! target = reference_offset
//!        + elapsed since the listening phase started (wall clock)
//!        + processing delay (capture -> match report)
//!        + pipeline delay (buffers, devices, player seek)
//!        + dynamic safety margin
//! ```
//!
//! The margin scales with the measured processing delay,
//! `max(floor, processing_delay * factor)`, so a slow matcher pushes the
//! target further ahead instead of landing perpetually behind.
//!
//! Estimates are computed fresh for every accepted match and never cached;
//! each one folds in the latest latency measurements.

use crate::config::LatencyConfig;
use crate::error::{Error, Result};
use crate::sync::cycle::ListeningSession;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Latency components feeding one estimate
///
/// All fields are durations, so negative contributions cannot be
/// represented. Unmeasured components carry conservative non-zero
/// defaults: an unmeasured pipeline still has overhead, and assuming
/// zero would bias every seek early.
#[derive(Debug, Clone, Copy)]
pub struct LatencySnapshot {
    /// Frame submitted to the matcher -> match report received
    pub processing_delay: Duration,
    /// Capture-side buffering before frames reach the pipeline
    pub input_buffer_delay: Duration,
    /// Microphone hardware/driver input latency
    pub device_input_latency: Duration,
    /// Playback hardware/driver output latency
    pub device_output_latency: Duration,
    /// Player seek round trip
    pub player_seek_delay: Duration,
}

impl LatencySnapshot {
    /// Snapshot built entirely from configured defaults
    pub fn from_defaults(config: &LatencyConfig) -> Self {
        Self {
            processing_delay: Duration::from_secs_f64(config.default_processing_delay),
            input_buffer_delay: Duration::from_secs_f64(config.default_input_buffer_delay),
            device_input_latency: Duration::from_secs_f64(config.default_device_input_latency),
            device_output_latency: Duration::from_secs_f64(config.default_device_output_latency),
            player_seek_delay: Duration::from_secs_f64(config.default_player_seek_delay),
        }
    }

    /// Everything downstream of the matcher
    pub fn pipeline_delay(&self) -> Duration {
        self.input_buffer_delay
            + self.device_input_latency
            + self.device_output_latency
            + self.player_seek_delay
    }
}

/// Breakdown of one theater time estimate, in seconds
///
/// Kept as plain seconds so it serializes straight into diagnostics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TheaterTimeEstimate {
    /// Matched position in the reference soundtrack
    pub reference_offset: f64,
    /// Wall-clock time since the listening phase started
    pub elapsed: f64,
    pub processing_delay: f64,
    pub pipeline_delay: f64,
    pub safety_margin: f64,
    /// Position the player should be seeked to
    pub target: f64,
}

/// Computes latency-compensated seek targets
#[derive(Debug, Clone, Copy)]
pub struct TheaterTimeEstimator {
    margin_factor: f64,
    margin_floor: Duration,
}

impl TheaterTimeEstimator {
    pub fn new(margin_factor: f64, margin_floor: Duration) -> Self {
        Self {
            margin_factor,
            margin_floor,
        }
    }

    /// Estimate current theater time for a match at `reference_offset_seconds`
    ///
    /// Elapsed time uses the session's wall-clock start; a wall clock that
    /// stepped backwards during the phase clamps elapsed to zero rather
    /// than pulling the target behind the reference offset. Fails when no
    /// listening session exists, which means the caller lost track of when
    /// listening began and any elapsed term would be a guess.
    pub fn estimate(
        &self,
        reference_offset_seconds: f64,
        session: Option<&ListeningSession>,
        now_wall: chrono::DateTime<chrono::Utc>,
        latencies: &LatencySnapshot,
    ) -> Result<TheaterTimeEstimate> {
        let session = session.ok_or_else(|| {
            Error::InvalidTiming(
                "match report without a listening session start time".to_string(),
            )
        })?;

        let elapsed = (now_wall - session.started_wall)
            .to_std()
            .unwrap_or(Duration::ZERO);

        let safety_margin = self
            .margin_floor
            .max(latencies.processing_delay.mul_f64(self.margin_factor));

        let pipeline_delay = latencies.pipeline_delay();
        let target = reference_offset_seconds
            + elapsed.as_secs_f64()
            + latencies.processing_delay.as_secs_f64()
            + pipeline_delay.as_secs_f64()
            + safety_margin.as_secs_f64();

        Ok(TheaterTimeEstimate {
            reference_offset: reference_offset_seconds,
            elapsed: elapsed.as_secs_f64(),
            processing_delay: latencies.processing_delay.as_secs_f64(),
            pipeline_delay: pipeline_delay.as_secs_f64(),
            safety_margin: safety_margin.as_secs_f64(),
            target,
        })
    }
}
