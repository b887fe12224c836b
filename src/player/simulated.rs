//! In-process simulated playback device
//!
//! Keeps a virtual position that advances in real time while playing.
//! Seeks complete after a configurable artificial latency so round-trip
//! measurement has something to measure. Used by the `simulated` player
//! backend and throughout the integration tests.

use crate::error::Result;
use crate::player::{PlaybackDevice, SeekAck};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct Inner {
    /// Position at the last anchor point, seconds
    position: f64,
    anchor: Instant,
    playing: bool,
    seek_targets: Vec<f64>,
}

impl Inner {
    fn effective_position(&self) -> f64 {
        if self.playing {
            self.position + self.anchor.elapsed().as_secs_f64()
        } else {
            self.position
        }
    }

    fn rebase(&mut self) {
        self.position = self.effective_position();
        self.anchor = Instant::now();
    }
}

/// Simulated local player
pub struct SimulatedPlayer {
    inner: Mutex<Inner>,
    seek_latency: Duration,
}

impl SimulatedPlayer {
    pub fn new(start_position: f64, playing: bool, seek_latency: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                position: start_position,
                anchor: Instant::now(),
                playing,
                seek_targets: Vec::new(),
            }),
            seek_latency,
        }
    }

    /// Targets of every seek issued so far, oldest first
    pub async fn seek_targets(&self) -> Vec<f64> {
        self.inner.lock().await.seek_targets.clone()
    }

    pub async fn seek_count(&self) -> usize {
        self.inner.lock().await.seek_targets.len()
    }
}

#[async_trait]
impl PlaybackDevice for SimulatedPlayer {
    async fn position(&self) -> Result<f64> {
        Ok(self.inner.lock().await.effective_position())
    }

    async fn seek(&self, to_seconds: f64) -> Result<SeekAck> {
        tokio::time::sleep(self.seek_latency).await;
        let mut inner = self.inner.lock().await;
        inner.position = to_seconds.max(0.0);
        inner.anchor = Instant::now();
        inner.seek_targets.push(to_seconds);
        Ok(SeekAck::now())
    }

    async fn play(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.playing {
            inner.anchor = Instant::now();
            inner.playing = true;
        }
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.playing {
            inner.rebase();
            inner.playing = false;
        }
        Ok(())
    }

    async fn is_playing(&self) -> Result<bool> {
        Ok(self.inner.lock().await.playing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_position_advances_while_playing() {
        let player = SimulatedPlayer::new(100.0, true, Duration::ZERO);
        let first = player.position().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = player.position().await.unwrap();
        assert!(second > first);
        assert!(first >= 100.0);
    }

    #[tokio::test]
    async fn test_position_holds_while_paused() {
        let player = SimulatedPlayer::new(100.0, false, Duration::ZERO);
        let first = player.position().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = player.position().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, 100.0);
    }

    #[tokio::test]
    async fn test_seek_rebases_position_and_logs_target() {
        let player = SimulatedPlayer::new(0.0, false, Duration::ZERO);
        player.seek(120.555).await.unwrap();
        let position = player.position().await.unwrap();
        assert!((position - 120.555).abs() < 1e-9);
        assert_eq!(player.seek_targets().await, vec![120.555]);
    }

    #[tokio::test]
    async fn test_seek_latency_is_observable() {
        let player = SimulatedPlayer::new(0.0, true, Duration::from_millis(40));
        let before = Instant::now();
        let ack = player.seek(10.0).await.unwrap();
        assert!(ack.completed_at.duration_since(before) >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_pause_then_play_resumes_from_held_position() {
        let player = SimulatedPlayer::new(50.0, true, Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(20)).await;
        player.pause().await.unwrap();
        let held = player.position().await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(player.position().await.unwrap(), held);

        player.play().await.unwrap();
        assert!(player.is_playing().await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(player.position().await.unwrap() > held);
    }

    #[tokio::test]
    async fn test_negative_seek_clamps_to_zero() {
        let player = SimulatedPlayer::new(10.0, false, Duration::ZERO);
        player.seek(-5.0).await.unwrap();
        assert_eq!(player.position().await.unwrap(), 0.0);
    }
}
