//! Latency measurement and history
//!
//! Tracks how long the control path actually takes, on the monotonic
//! clock only: match received -> seek issued (decision overhead) and seek
//! issued -> seek completed (player round trip). Wall clocks never enter
//! this module; they can step and would poison the samples.
//!
//! The rolling history exists for diagnostics. Sync decisions read the
//! point measurements, never the history.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Bounded FIFO of match-to-seek samples, oldest evicted first
#[derive(Debug, Clone)]
pub struct LatencyHistory {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl LatencyHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, seconds: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(seconds);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples oldest first
    pub fn samples(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }

    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
        }
    }
}

/// Measurements from one completed seek round trip
#[derive(Debug, Clone, Copy)]
pub struct CompletedSeek {
    /// Seek issued -> seek completed
    pub round_trip: Duration,
    /// Match received -> seek completed, when both ends were marked
    pub end_to_end: Option<Duration>,
    /// End-to-end under the health threshold
    pub performance_good: bool,
}

/// Serializable view of the tracker for diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyReport {
    /// Match-to-seek samples, oldest first, seconds
    pub samples: Vec<f64>,
    pub capacity: usize,
    pub average_match_to_seek: Option<f64>,
    pub last_match_to_seek: Option<f64>,
    pub last_round_trip: Option<f64>,
    pub last_end_to_end: Option<f64>,
    pub performance_good: Option<bool>,
}

/// Per-match latency tracker
///
/// The mark methods form a sequence per accepted match: received ->
/// issued -> completed. Sentinels reset once the round trip completes.
/// A new match overwrites an unfinished measurement; samples outside the
/// sane bound are logged and dropped without touching the history.
#[derive(Debug)]
pub struct LatencyTracker {
    history: LatencyHistory,
    max_sample: Duration,
    health_threshold: Duration,
    match_received_at: Option<Instant>,
    seek_issued_at: Option<Instant>,
    last_match_to_seek: Option<f64>,
    last_round_trip: Option<f64>,
    last_end_to_end: Option<f64>,
    performance_good: Option<bool>,
}

impl LatencyTracker {
    pub fn new(history_capacity: usize, max_sample: Duration, health_threshold: Duration) -> Self {
        Self {
            history: LatencyHistory::new(history_capacity),
            max_sample,
            health_threshold,
            match_received_at: None,
            seek_issued_at: None,
            last_match_to_seek: None,
            last_round_trip: None,
            last_end_to_end: None,
            performance_good: None,
        }
    }

    /// A match report arrived; start a measurement
    pub fn mark_match_received(&mut self, at: Instant) {
        if self.match_received_at.is_some() || self.seek_issued_at.is_some() {
            debug!("New match supersedes an unfinished latency measurement");
        }
        self.match_received_at = Some(at);
        self.seek_issued_at = None;
    }

    /// The seek command left; record the match-to-seek sample
    ///
    /// Returns the sample when it was sane enough to keep.
    pub fn mark_seek_issued(&mut self, at: Instant) -> Option<Duration> {
        self.seek_issued_at = Some(at);

        let received = match self.match_received_at {
            Some(r) => r,
            None => {
                warn!("Seek issued without a marked match, skipping sample");
                return None;
            }
        };

        let sample = match at.checked_duration_since(received) {
            Some(s) => s,
            None => {
                warn!("Seek issue time precedes match receipt, discarding sample");
                return None;
            }
        };

        if sample > self.max_sample {
            warn!(
                sample_secs = sample.as_secs_f64(),
                bound_secs = self.max_sample.as_secs_f64(),
                "Match-to-seek sample exceeds sane bound, discarding"
            );
            return None;
        }

        self.history.push(sample.as_secs_f64());
        self.last_match_to_seek = Some(sample.as_secs_f64());
        Some(sample)
    }

    /// The player acknowledged the seek; close out the measurement
    ///
    /// Resets the per-match sentinels so the next match starts clean.
    pub fn mark_seek_completed(&mut self, at: Instant) -> Option<CompletedSeek> {
        let issued = match self.seek_issued_at {
            Some(i) => i,
            None => {
                warn!("Seek completion without a marked issue time, ignoring");
                return None;
            }
        };

        let round_trip = match at.checked_duration_since(issued) {
            Some(rt) if rt <= self.max_sample => rt,
            Some(rt) => {
                warn!(
                    sample_secs = rt.as_secs_f64(),
                    "Seek round trip exceeds sane bound, discarding"
                );
                self.reset_sentinels();
                return None;
            }
            None => {
                warn!("Seek completion precedes issue time, discarding");
                self.reset_sentinels();
                return None;
            }
        };

        let end_to_end = self
            .match_received_at
            .and_then(|received| at.checked_duration_since(received));

        let performance_good = end_to_end
            .map(|e2e| e2e < self.health_threshold)
            .unwrap_or(round_trip < self.health_threshold);

        self.last_round_trip = Some(round_trip.as_secs_f64());
        self.last_end_to_end = end_to_end.map(|d| d.as_secs_f64());
        self.performance_good = Some(performance_good);
        self.reset_sentinels();

        Some(CompletedSeek {
            round_trip,
            end_to_end,
            performance_good,
        })
    }

    /// Drop an unfinished measurement (match ended without a seek)
    pub fn abandon(&mut self) {
        self.reset_sentinels();
    }

    fn reset_sentinels(&mut self) {
        self.match_received_at = None;
        self.seek_issued_at = None;
    }

    /// Last completed round trip, for the next estimate's seek-delay term
    pub fn last_round_trip(&self) -> Option<Duration> {
        self.last_round_trip.map(Duration::from_secs_f64)
    }

    pub fn performance_good(&self) -> Option<bool> {
        self.performance_good
    }

    pub fn report(&self) -> LatencyReport {
        LatencyReport {
            samples: self.history.samples(),
            capacity: self.history.capacity(),
            average_match_to_seek: self.history.average(),
            last_match_to_seek: self.last_match_to_seek,
            last_round_trip: self.last_round_trip,
            last_end_to_end: self.last_end_to_end,
            performance_good: self.performance_good,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> LatencyTracker {
        LatencyTracker::new(20, Duration::from_secs(10), Duration::from_millis(100))
    }

    #[test]
    fn test_history_evicts_oldest_at_capacity() {
        let mut history = LatencyHistory::new(3);
        history.push(1.0);
        history.push(2.0);
        history.push(3.0);
        history.push(4.0);
        assert_eq!(history.len(), 3);
        assert_eq!(history.samples(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_history_average() {
        let mut history = LatencyHistory::new(5);
        assert_eq!(history.average(), None);
        history.push(0.050);
        history.push(0.150);
        assert!((history.average().unwrap() - 0.100).abs() < 1e-9);
    }

    #[test]
    fn test_full_measurement_sequence() {
        let mut t = tracker();
        let base = Instant::now();

        t.mark_match_received(base);
        let sample = t.mark_seek_issued(base + Duration::from_millis(30)).unwrap();
        assert_eq!(sample, Duration::from_millis(30));

        let completed = t
            .mark_seek_completed(base + Duration::from_millis(70))
            .unwrap();
        assert_eq!(completed.round_trip, Duration::from_millis(40));
        assert_eq!(completed.end_to_end, Some(Duration::from_millis(70)));
        assert!(completed.performance_good);

        assert_eq!(t.report().samples, vec![0.030]);
        assert_eq!(t.last_round_trip(), Some(Duration::from_millis(40)));
    }

    #[test]
    fn test_sentinels_reset_after_round_trip() {
        let mut t = tracker();
        let base = Instant::now();

        t.mark_match_received(base);
        t.mark_seek_issued(base + Duration::from_millis(10));
        t.mark_seek_completed(base + Duration::from_millis(20));

        // Closed out: a stray completion has nothing to measure against
        assert!(t.mark_seek_completed(base + Duration::from_millis(30)).is_none());
    }

    #[test]
    fn test_slow_end_to_end_flags_poor_performance() {
        let mut t = tracker();
        let base = Instant::now();

        t.mark_match_received(base);
        t.mark_seek_issued(base + Duration::from_millis(80));
        let completed = t
            .mark_seek_completed(base + Duration::from_millis(150))
            .unwrap();
        assert!(!completed.performance_good);
        assert_eq!(t.performance_good(), Some(false));
    }

    #[test]
    fn test_oversized_sample_is_discarded() {
        let mut t = tracker();
        let base = Instant::now();

        t.mark_match_received(base);
        assert!(t.mark_seek_issued(base + Duration::from_secs(11)).is_none());
        assert!(t.report().samples.is_empty());
        assert_eq!(t.report().last_match_to_seek, None);
    }

    #[test]
    fn test_backwards_clock_sample_is_discarded() {
        let mut t = tracker();
        let base = Instant::now();

        t.mark_match_received(base + Duration::from_millis(50));
        assert!(t.mark_seek_issued(base).is_none());
        assert!(t.report().samples.is_empty());
    }

    #[test]
    fn test_seek_issued_without_match_keeps_round_trip_usable() {
        let mut t = tracker();
        let base = Instant::now();

        assert!(t.mark_seek_issued(base).is_none());
        let completed = t.mark_seek_completed(base + Duration::from_millis(25)).unwrap();
        assert_eq!(completed.round_trip, Duration::from_millis(25));
        assert_eq!(completed.end_to_end, None);
    }

    #[test]
    fn test_new_match_supersedes_unfinished_measurement() {
        let mut t = tracker();
        let base = Instant::now();

        t.mark_match_received(base);
        // No seek happened for the first match; second match restarts
        t.mark_match_received(base + Duration::from_millis(500));
        let sample = t
            .mark_seek_issued(base + Duration::from_millis(530))
            .unwrap();
        assert_eq!(sample, Duration::from_millis(30));
    }

    #[test]
    fn test_abandon_clears_pending_measurement() {
        let mut t = tracker();
        let base = Instant::now();

        t.mark_match_received(base);
        t.abandon();
        assert!(t.mark_seek_issued(base + Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_report_reflects_history_capacity() {
        let t = LatencyTracker::new(7, Duration::from_secs(10), Duration::from_millis(100));
        let report = t.report();
        assert_eq!(report.capacity, 7);
        assert!(report.samples.is_empty());
        assert_eq!(report.average_match_to_seek, None);
    }
}
