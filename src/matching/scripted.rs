//! Scripted matching backend
//!
//! Deterministic stand-in for a real fingerprint matcher: consumes a
//! configured number of frames, then reports a match whose reference
//! offset advances with session time, as if the soundtrack were playing
//! in the room. Drives demos and tests end to end without a catalog.

use crate::audio::AudioFrame;
use crate::config::MatcherConfig;
use crate::matching::{MatchOutcome, MatchReport, MatcherSession, MatchingEngine};
use crate::error::Result;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

pub struct ScriptedMatcher {
    media_id: Uuid,
    title: Option<String>,
    base_offset: f64,
    frames_until_match: u32,
}

impl ScriptedMatcher {
    pub fn new(base_offset: f64, frames_until_match: u32, title: Option<String>) -> Self {
        Self {
            media_id: Uuid::new_v4(),
            title,
            base_offset,
            frames_until_match: frames_until_match.max(1),
        }
    }

    pub fn from_config(config: &MatcherConfig) -> Self {
        Self::new(
            config.scripted_offset,
            config.scripted_frames_until_match,
            config.scripted_title.clone(),
        )
    }

    pub fn media_id(&self) -> Uuid {
        self.media_id
    }
}

impl MatchingEngine for ScriptedMatcher {
    fn begin_session(&self) -> Result<MatcherSession> {
        let (frame_tx, mut frame_rx) = mpsc::channel::<AudioFrame>(8);
        let (outcome_tx, outcome_rx) = mpsc::channel(16);

        let media_id = self.media_id;
        let title = self.title.clone();
        let base_offset = self.base_offset;
        let needed = self.frames_until_match;

        let worker = tokio::spawn(async move {
            let session_started = Instant::now();
            let mut seen: u32 = 0;
            while let Some(frame) = frame_rx.recv().await {
                seen += 1;
                let outcome = if seen % needed == 0 {
                    let offset = base_offset + session_started.elapsed().as_secs_f64();
                    MatchOutcome::Match(MatchReport {
                        media_id,
                        title: title.clone(),
                        reference_offset_seconds: offset,
                        submitted_at: frame.submitted_at,
                    })
                } else {
                    MatchOutcome::NoMatch { reason: None }
                };
                if outcome_tx.send(outcome).await.is_err() {
                    break;
                }
            }
            debug!("Scripted matcher session ended");
        });

        Ok(MatcherSession::new(frame_tx, outcome_rx, worker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioFrame;
    use std::time::Duration;

    fn frame() -> AudioFrame {
        let mut f = AudioFrame::new(vec![0.0; 16], 44100);
        f.submitted_at = Some(Instant::now());
        f
    }

    async fn next_outcome(session: &mut MatcherSession) -> MatchOutcome {
        tokio::time::timeout(Duration::from_secs(1), session.recv())
            .await
            .expect("outcome within timeout")
            .expect("session alive")
    }

    #[tokio::test]
    async fn test_reports_match_after_configured_frames() {
        let matcher = ScriptedMatcher::new(120.0, 3, Some("Feature".to_string()));
        let mut session = matcher.begin_session().unwrap();
        let sender = session.frame_sender();

        for _ in 0..3 {
            sender.send(frame()).await.unwrap();
        }

        assert!(matches!(
            next_outcome(&mut session).await,
            MatchOutcome::NoMatch { .. }
        ));
        assert!(matches!(
            next_outcome(&mut session).await,
            MatchOutcome::NoMatch { .. }
        ));

        match next_outcome(&mut session).await {
            MatchOutcome::Match(report) => {
                assert_eq!(report.media_id, matcher.media_id());
                assert_eq!(report.title.as_deref(), Some("Feature"));
                assert!(report.reference_offset_seconds >= 120.0);
                assert!(report.submitted_at.is_some());
            }
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_offset_advances_with_session_time() {
        let matcher = ScriptedMatcher::new(60.0, 1, None);
        let mut session = matcher.begin_session().unwrap();
        let sender = session.frame_sender();

        sender.send(frame()).await.unwrap();
        let first = match next_outcome(&mut session).await {
            MatchOutcome::Match(r) => r.reference_offset_seconds,
            other => panic!("expected match, got {:?}", other),
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        sender.send(frame()).await.unwrap();
        let second = match next_outcome(&mut session).await {
            MatchOutcome::Match(r) => r.reference_offset_seconds,
            other => panic!("expected match, got {:?}", other),
        };

        assert!(second > first);
    }

    #[tokio::test]
    async fn test_fresh_session_restarts_frame_count() {
        let matcher = ScriptedMatcher::new(0.0, 2, None);

        let mut first = matcher.begin_session().unwrap();
        let sender = first.frame_sender();
        sender.send(frame()).await.unwrap();
        assert!(matches!(
            next_outcome(&mut first).await,
            MatchOutcome::NoMatch { .. }
        ));
        drop(sender);
        drop(first);

        // New session needs the full count again
        let mut second = matcher.begin_session().unwrap();
        let sender = second.frame_sender();
        sender.send(frame()).await.unwrap();
        assert!(matches!(
            next_outcome(&mut second).await,
            MatchOutcome::NoMatch { .. }
        ));
        sender.send(frame()).await.unwrap();
        assert!(matches!(
            next_outcome(&mut second).await,
            MatchOutcome::Match(_)
        ));
    }

    #[tokio::test]
    async fn test_dropped_session_stops_accepting_frames() {
        let matcher = ScriptedMatcher::new(0.0, 1, None);
        let session = matcher.begin_session().unwrap();
        let sender = session.frame_sender();
        drop(session);

        // Worker is aborted; the frame channel closes shortly after
        let mut closed = false;
        for _ in 0..50 {
            if sender.send(frame()).await.is_err() {
                closed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(closed, "frame channel should close once the session drops");
    }
}
