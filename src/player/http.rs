//! HTTP playback device adapter
//!
//! Drives a local player over its HTTP control surface:
//!
//! - `GET  /playback/position` -> `{ position_ms, ... }`
//! - `POST /playback/seek`     <- `{ position_ms }`
//! - `POST /playback/play`
//! - `POST /playback/pause`
//! - `GET  /playback/state`    -> `{ state: "playing" | "paused" }`
//!
//! Positions cross the wire in milliseconds; the trait speaks seconds.

use crate::error::{Error, Result};
use crate::player::{PlaybackDevice, SeekAck};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct PositionResponse {
    position_ms: u64,
}

#[derive(Debug, Serialize)]
struct SeekRequest {
    position_ms: i64,
}

#[derive(Debug, Deserialize)]
struct StateResponse {
    state: String,
}

/// Playback device reached over HTTP
pub struct HttpPlayer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPlayer {
    /// Build a client for the player at `base_url` (no trailing slash)
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Player(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_expect_ok(&self, path: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url(path))
            .send()
            .await
            .map_err(|e| Error::Player(format!("POST {} failed: {}", path, e)))?;

        if !response.status().is_success() {
            return Err(Error::Player(format!(
                "POST {} returned {}",
                path,
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PlaybackDevice for HttpPlayer {
    async fn position(&self) -> Result<f64> {
        let response = self
            .client
            .get(self.url("/playback/position"))
            .send()
            .await
            .map_err(|e| Error::Player(format!("position query failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Player(format!(
                "position query returned {}",
                response.status()
            )));
        }

        let body: PositionResponse = response
            .json()
            .await
            .map_err(|e| Error::Player(format!("position response parse failed: {}", e)))?;

        Ok(body.position_ms as f64 / 1000.0)
    }

    async fn seek(&self, to_seconds: f64) -> Result<SeekAck> {
        let position_ms = (to_seconds * 1000.0).round().max(0.0) as i64;
        debug!(position_ms, "Issuing HTTP seek");

        let response = self
            .client
            .post(self.url("/playback/seek"))
            .json(&SeekRequest { position_ms })
            .send()
            .await
            .map_err(|e| Error::Player(format!("seek failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Player(format!(
                "seek returned {}",
                response.status()
            )));
        }

        Ok(SeekAck::now())
    }

    async fn play(&self) -> Result<()> {
        self.post_expect_ok("/playback/play").await
    }

    async fn pause(&self) -> Result<()> {
        self.post_expect_ok("/playback/pause").await
    }

    async fn is_playing(&self) -> Result<bool> {
        let response = self
            .client
            .get(self.url("/playback/state"))
            .send()
            .await
            .map_err(|e| Error::Player(format!("state query failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Player(format!(
                "state query returned {}",
                response.status()
            )));
        }

        let body: StateResponse = response
            .json()
            .await
            .map_err(|e| Error::Player(format!("state response parse failed: {}", e)))?;

        Ok(body.state == "playing")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let player = HttpPlayer::new("http://127.0.0.1:5721/", Duration::from_secs(2)).unwrap();
        assert_eq!(player.url("/playback/seek"), "http://127.0.0.1:5721/playback/seek");
    }

    #[test]
    fn test_seek_request_serializes_milliseconds() {
        let json = serde_json::to_string(&SeekRequest { position_ms: 120555 }).unwrap();
        assert_eq!(json, "{\"position_ms\":120555}");
    }

    #[test]
    fn test_position_response_ignores_extra_fields() {
        let body = r#"{"passage_id":null,"position_ms":42000,"duration_ms":180000,"state":"playing"}"#;
        let parsed: PositionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.position_ms, 42000);
    }
}
