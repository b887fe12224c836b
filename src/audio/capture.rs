//! Capture seam and microphone backend
//!
//! The engine hands a [`FrameSink`] to a [`CaptureSource`] and gets back a
//! running [`CaptureStream`]. Dropping the stream releases the device.
//! The sink applies the engine's forwarding gate and never blocks, so
//! capture callbacks stay real-time safe.
//!
//! cpal streams are not `Send`, so the microphone backend parks its
//! stream on a dedicated thread and joins it on drop.

use crate::audio::types::AudioFrame;
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// What happened to a pushed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushResult {
    /// Forwarded to the matcher
    Sent,
    /// Forwarding gate is closed (phase already matched or ended)
    Gated,
    /// Matcher input is backed up; frame dropped
    ChannelFull,
    /// Matcher side is gone
    Closed,
}

/// Entry point for captured frames
///
/// Owned by capture backends, wired by the engine. The gate flips off the
/// moment a listening phase accepts its match, so late frames die here
/// instead of waking the matcher.
#[derive(Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<AudioFrame>,
    gate: Arc<AtomicBool>,
}

impl FrameSink {
    pub fn new(tx: mpsc::Sender<AudioFrame>, gate: Arc<AtomicBool>) -> Self {
        Self { tx, gate }
    }

    /// Forward a frame to the matcher without blocking
    pub fn push(&self, mut frame: AudioFrame) -> PushResult {
        if !self.gate.load(Ordering::Acquire) {
            return PushResult::Gated;
        }
        frame.submitted_at = Some(Instant::now());
        match self.tx.try_send(frame) {
            Ok(()) => PushResult::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Matcher input full, dropping frame");
                PushResult::ChannelFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => PushResult::Closed,
        }
    }
}

/// Capture-side latency hints, when the backend knows them
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureLatency {
    /// Frame accumulation / buffering before frames leave the backend
    pub input_buffer: Option<Duration>,
    /// Hardware/driver input latency
    pub device_input: Option<Duration>,
}

/// A running capture stream; dropping it releases the device
///
/// Streams are held inside the engine task's state, which the runtime may
/// reference across await points, so implementations must be `Sync` too.
pub trait CaptureStream: Send + Sync {
    /// Latency hints for the theater time estimate
    fn latency(&self) -> CaptureLatency;
}

/// Something that can open a capture stream into a sink
pub trait CaptureSource: Send + Sync {
    fn open(&self, sink: FrameSink) -> Result<Box<dyn CaptureStream>>;
}

/// Default-input microphone capture via cpal
pub struct MicCapture {
    sample_rate: u32,
    frame_size: usize,
}

impl MicCapture {
    /// `sample_rate` is the preferred rate; the device's own rate is used
    /// when it cannot honor the request, and each frame reports the rate
    /// it was actually captured at.
    pub fn new(sample_rate: u32, frame_size: usize) -> Self {
        Self {
            sample_rate,
            frame_size,
        }
    }
}

impl CaptureSource for MicCapture {
    fn open(&self, sink: FrameSink) -> Result<Box<dyn CaptureStream>> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let requested_rate = self.sample_rate;
        let frame_size = self.frame_size;

        let join = std::thread::Builder::new()
            .name("ambient-capture".to_string())
            .spawn(move || run_capture_thread(requested_rate, frame_size, sink, ready_tx, stop_rx))
            .map_err(|e| Error::Capture(format!("failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(latency)) => Ok(Box::new(MicStream {
                stop_tx: Some(stop_tx),
                join: Some(join),
                latency,
            })),
            Ok(Err(message)) => {
                let _ = join.join();
                Err(Error::Capture(message))
            }
            Err(_) => {
                // Dropping stop_tx unblocks the thread if it ever gets there
                warn!("Capture thread did not report readiness in time");
                Err(Error::Capture(
                    "capture device did not become ready".to_string(),
                ))
            }
        }
    }
}

/// Handle to the capture thread; stops and joins on drop
struct MicStream {
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    join: Option<std::thread::JoinHandle<()>>,
    latency: CaptureLatency,
}

impl CaptureStream for MicStream {
    fn latency(&self) -> CaptureLatency {
        self.latency
    }
}

impl Drop for MicStream {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn run_capture_thread(
    requested_rate: u32,
    frame_size: usize,
    sink: FrameSink,
    ready_tx: std::sync::mpsc::Sender<std::result::Result<CaptureLatency, String>>,
    stop_rx: std::sync::mpsc::Receiver<()>,
) {
    let setup = (|| -> std::result::Result<(cpal::Stream, CaptureLatency), String> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| "no default input device found".to_string())?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let (config, sample_format) = best_input_config(&device, requested_rate)?;
        info!(
            "Capturing ambient audio from {}: {} Hz, {} ch, {:?}",
            device_name, config.sample_rate.0, config.channels, sample_format
        );

        let forwarder = FrameForwarder::new(
            sink,
            config.channels as usize,
            config.sample_rate.0,
            frame_size,
        );

        let stream = match sample_format {
            SampleFormat::F32 => build_stream_f32(&device, &config, forwarder)?,
            SampleFormat::I16 => build_stream_i16(&device, &config, forwarder)?,
            SampleFormat::U16 => build_stream_u16(&device, &config, forwarder)?,
            other => return Err(format!("unsupported sample format: {:?}", other)),
        };

        stream
            .play()
            .map_err(|e| format!("failed to start capture stream: {}", e))?;

        let latency = CaptureLatency {
            input_buffer: Some(Duration::from_secs_f64(
                frame_size as f64 / config.sample_rate.0 as f64,
            )),
            device_input: None,
        };
        Ok((stream, latency))
    })();

    match setup {
        Ok((stream, latency)) => {
            let _ = ready_tx.send(Ok(latency));
            // Park until the handle asks us to stop (or is dropped)
            let _ = stop_rx.recv();
            drop(stream);
            debug!("Ambient capture thread exiting");
        }
        Err(message) => {
            let _ = ready_tx.send(Err(message));
        }
    }
}

/// Pick an input configuration, preferring the requested rate with f32
fn best_input_config(
    device: &cpal::Device,
    requested_rate: u32,
) -> std::result::Result<(StreamConfig, SampleFormat), String> {
    if let Ok(mut supported) = device.supported_input_configs() {
        let preferred = supported.find(|config| {
            config.min_sample_rate().0 <= requested_rate
                && config.max_sample_rate().0 >= requested_rate
                && config.sample_format() == SampleFormat::F32
        });
        if let Some(supported_config) = preferred {
            let sample_format = supported_config.sample_format();
            let config = supported_config
                .with_sample_rate(cpal::SampleRate(requested_rate))
                .config();
            return Ok((config, sample_format));
        }
    }

    // Fallback: whatever the device prefers
    let supported_config = device
        .default_input_config()
        .map_err(|e| format!("failed to get default input config: {}", e))?;
    let sample_format = supported_config.sample_format();
    Ok((supported_config.config(), sample_format))
}

/// Accumulates interleaved input into mono frames and pushes them
struct FrameForwarder {
    sink: FrameSink,
    channels: usize,
    sample_rate: u32,
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameForwarder {
    fn new(sink: FrameSink, channels: usize, sample_rate: u32, frame_size: usize) -> Self {
        Self {
            sink,
            channels: channels.max(1),
            sample_rate,
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    fn push_mono(&mut self, sample: f32) {
        self.pending.push(sample);
        if self.pending.len() >= self.frame_size {
            let samples = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
            let _ = self.sink.push(AudioFrame::new(samples, self.sample_rate));
        }
    }

    fn consume_f32(&mut self, data: &[f32]) {
        for frame in data.chunks(self.channels) {
            let sum: f32 = frame.iter().sum();
            self.push_mono(sum / frame.len() as f32);
        }
    }

    fn consume_i16(&mut self, data: &[i16]) {
        for frame in data.chunks(self.channels) {
            let sum: f32 = frame.iter().map(|&s| s as f32 / 32768.0).sum();
            self.push_mono(sum / frame.len() as f32);
        }
    }

    fn consume_u16(&mut self, data: &[u16]) {
        for frame in data.chunks(self.channels) {
            let sum: f32 = frame
                .iter()
                .map(|&s| (s as f32 - 32768.0) / 32768.0)
                .sum();
            self.push_mono(sum / frame.len() as f32);
        }
    }
}

fn build_stream_f32(
    device: &cpal::Device,
    config: &StreamConfig,
    mut forwarder: FrameForwarder,
) -> std::result::Result<cpal::Stream, String> {
    device
        .build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| forwarder.consume_f32(data),
            |err| error!("Capture stream error: {}", err),
            None,
        )
        .map_err(|e| format!("failed to build f32 input stream: {}", e))
}

fn build_stream_i16(
    device: &cpal::Device,
    config: &StreamConfig,
    mut forwarder: FrameForwarder,
) -> std::result::Result<cpal::Stream, String> {
    device
        .build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| forwarder.consume_i16(data),
            |err| error!("Capture stream error: {}", err),
            None,
        )
        .map_err(|e| format!("failed to build i16 input stream: {}", e))
}

fn build_stream_u16(
    device: &cpal::Device,
    config: &StreamConfig,
    mut forwarder: FrameForwarder,
) -> std::result::Result<cpal::Stream, String> {
    device
        .build_input_stream(
            config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| forwarder.consume_u16(data),
            |err| error!("Capture stream error: {}", err),
            None,
        )
        .map_err(|e| format!("failed to build u16 input stream: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_gate() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(true))
    }

    #[tokio::test]
    async fn test_sink_stamps_submission_time() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = FrameSink::new(tx, open_gate());

        let result = sink.push(AudioFrame::new(vec![0.0; 8], 44100));
        assert_eq!(result, PushResult::Sent);

        let frame = rx.recv().await.unwrap();
        assert!(frame.submitted_at.is_some());
    }

    #[tokio::test]
    async fn test_closed_gate_blocks_frames() {
        let (tx, mut rx) = mpsc::channel(4);
        let gate = open_gate();
        let sink = FrameSink::new(tx, gate.clone());

        gate.store(false, Ordering::Release);
        assert_eq!(
            sink.push(AudioFrame::new(vec![0.0; 8], 44100)),
            PushResult::Gated
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_channel_drops_frame() {
        let (tx, _rx) = mpsc::channel(1);
        let sink = FrameSink::new(tx, open_gate());

        assert_eq!(
            sink.push(AudioFrame::new(vec![0.0; 8], 44100)),
            PushResult::Sent
        );
        assert_eq!(
            sink.push(AudioFrame::new(vec![0.0; 8], 44100)),
            PushResult::ChannelFull
        );
    }

    #[tokio::test]
    async fn test_dropped_receiver_reports_closed() {
        let (tx, rx) = mpsc::channel(1);
        let sink = FrameSink::new(tx, open_gate());
        drop(rx);

        assert_eq!(
            sink.push(AudioFrame::new(vec![0.0; 8], 44100)),
            PushResult::Closed
        );
    }

    #[test]
    fn test_forwarder_downmixes_and_chunks() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = FrameSink::new(tx, open_gate());
        let mut forwarder = FrameForwarder::new(sink, 2, 48000, 3);

        // Two stereo sample frames -> two mono samples, no flush yet
        forwarder.consume_f32(&[0.2, 0.4, -1.0, 1.0]);
        assert!(rx.try_recv().is_err());

        // Third mono sample completes the frame
        forwarder.consume_f32(&[0.5, 0.5]);
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.sample_rate, 48000);
        assert_eq!(frame.samples.len(), 3);
        assert!((frame.samples[0] - 0.3).abs() < 1e-6);
        assert!(frame.samples[1].abs() < 1e-6);
        assert!((frame.samples[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_forwarder_converts_i16() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = FrameSink::new(tx, open_gate());
        let mut forwarder = FrameForwarder::new(sink, 1, 44100, 2);

        forwarder.consume_i16(&[i16::MIN, 16384]);
        let frame = rx.try_recv().unwrap();
        assert!((frame.samples[0] + 1.0).abs() < 1e-6);
        assert!((frame.samples[1] - 0.5).abs() < 1e-6);
    }
}
