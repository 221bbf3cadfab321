//! Sliding sample window.
//!
//! Samples are collected into a fixed-capacity ring (window duration × sample
//! rate). The oldest sample is evicted once the ring is full. The window also
//! tracks how many samples arrived since the last feature emission so the
//! extractor can enforce the hop size.

use crate::source::types::SensorSample;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Outcome of pushing a sample into the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Sample appended
    Accepted,
    /// Sample appended after the window was cleared because of a gap
    GapReset,
}

/// Bounded, time-ordered ring of the most recent samples.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: VecDeque<SensorSample>,
    capacity: usize,
    /// Samples appended since the last call to `mark_emitted`
    fresh: usize,
    /// Largest tolerated gap between consecutive samples
    staleness_bound: Duration,
}

impl SampleWindow {
    /// Create a window holding `capacity` samples.
    pub fn new(capacity: usize, staleness_bound: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            fresh: 0,
            staleness_bound,
        }
    }

    /// Timestamp of the newest sample.
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.samples.back().map(|s| s.timestamp)
    }

    /// Append a sample that is known to be newer than the latest one.
    pub fn push(&mut self, sample: SensorSample) -> PushOutcome {
        let mut outcome = PushOutcome::Accepted;

        if let Some(latest) = self.latest_timestamp() {
            if sample.timestamp - latest > self.staleness_bound {
                self.clear();
                outcome = PushOutcome::GapReset;
            }
        }

        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.fresh += 1;

        outcome
    }

    /// Whether the window holds its full configured duration.
    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    /// Samples appended since the last emission.
    pub fn fresh_count(&self) -> usize {
        self.fresh
    }

    /// Record that features were emitted for the current contents.
    pub fn mark_emitted(&mut self) {
        self.fresh = 0;
    }

    /// All samples, oldest first.
    pub fn samples(&self) -> &VecDeque<SensorSample> {
        &self.samples
    }

    /// The samples that arrived since the last emission, oldest first.
    /// Bounded by the window length.
    pub fn recent(&self) -> impl Iterator<Item = &SensorSample> {
        let skip = self.samples.len().saturating_sub(self.fresh);
        self.samples.iter().skip(skip)
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

    /// Duration covered between the oldest and newest sample.
    pub fn span(&self) -> Duration {
        match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => Duration::zero(),
        }
    }

    /// Drop every sample and the hop counter.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.fresh = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_at(start: DateTime<Utc>, ms: i64, mag: f64) -> SensorSample {
        SensorSample::new(start + Duration::milliseconds(ms), [0.0, 0.0, mag], [0.0; 3])
    }

    #[test]
    fn test_window_evicts_oldest() {
        let start = Utc::now();
        let mut window = SampleWindow::new(3, Duration::milliseconds(100));
        for i in 0..5 {
            window.push(sample_at(start, i * 20, i as f64));
        }

        assert!(window.is_full());
        let mags: Vec<f64> = window.samples().iter().map(|s| s.az).collect();
        assert_eq!(mags, vec![2.0, 3.0, 4.0]);
        assert_eq!(window.span(), Duration::milliseconds(40));
    }

    #[test]
    fn test_recent_tracks_hop() {
        let start = Utc::now();
        let mut window = SampleWindow::new(4, Duration::milliseconds(100));
        for i in 0..4 {
            window.push(sample_at(start, i * 20, i as f64));
        }
        window.mark_emitted();
        window.push(sample_at(start, 80, 9.0));

        assert_eq!(window.fresh_count(), 1);
        let recent: Vec<f64> = window.recent().map(|s| s.az).collect();
        assert_eq!(recent, vec![9.0]);
    }

    #[test]
    fn test_gap_resets_window() {
        let start = Utc::now();
        let mut window = SampleWindow::new(4, Duration::milliseconds(100));
        window.push(sample_at(start, 0, 1.0));
        window.push(sample_at(start, 20, 1.0));

        let outcome = window.push(sample_at(start, 1_000, 1.0));
        assert_eq!(outcome, PushOutcome::GapReset);
        assert_eq!(window.len(), 1);
        assert_eq!(window.fresh_count(), 1);
    }
}
