//! Deterministic simulated motion source.
//!
//! Stands in for the hardware abstraction: scripted segments (standing,
//! walking, impacts, lying) are rendered into timestamped samples at a fixed
//! rate, either all at once or streamed from a background thread.

use crate::source::types::{SensorSample, STANDARD_GRAVITY};
use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Amplitude of the postural sway added to still segments (m/s²).
const SWAY_AMPLITUDE: f64 = 0.05;

/// Sway frequency (Hz).
const SWAY_FREQUENCY: f64 = 0.7;

/// Step frequency of the walking gait (Hz).
const GAIT_FREQUENCY: f64 = 2.5;

/// Predefined scenarios used by the CLI and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Upright and still
    Standing,
    /// Steady walking gait
    Walking,
    /// Hard impact followed by lying still
    Fall,
    /// Impact followed by a quick return to walking
    Stumble,
    /// Settling into a reclined seated posture
    SitDown,
}

impl Scenario {
    /// Render the scenario into segments.
    pub fn builder(self) -> ScenarioBuilder {
        let b = ScenarioBuilder::new();
        match self {
            Scenario::Standing => b.still(10.0, 0.0),
            Scenario::Walking => b.walk(10.0, 2.0),
            Scenario::Fall => b.still(2.0, 0.0).impact(3, 20.0).still(8.0, 90.0),
            Scenario::Stumble => b.still(2.0, 0.0).impact(3, 20.0).walk(6.0, 2.0),
            Scenario::SitDown => b.still(2.0, 0.0).still(6.0, 45.0),
        }
    }
}

/// One scripted piece of motion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Segment {
    /// Still at the given tilt from upright (degrees) with light sway
    Still { secs: f64, tilt_deg: f64 },
    /// Rhythmic gait modulating the vertical axis
    Walk { secs: f64, amplitude: f64 },
    /// A run of samples at the given acceleration magnitude
    Impact { samples: usize, peak: f64 },
}

impl Segment {
    fn sample_count(&self, rate_hz: f64) -> usize {
        match *self {
            Segment::Still { secs, .. } | Segment::Walk { secs, .. } => {
                (secs * rate_hz).round() as usize
            }
            Segment::Impact { samples, .. } => samples,
        }
    }

    /// Acceleration and gyro for the `index`-th sample of this segment.
    /// `global` is the overall sample index, used for continuous sway phase.
    fn render(&self, index: usize, global: usize, rate_hz: f64) -> ([f64; 3], [f64; 3]) {
        let t = global as f64 / rate_hz;
        match *self {
            Segment::Still { tilt_deg, .. } => {
                let theta = tilt_deg.to_radians();
                let sway = SWAY_AMPLITUDE * (2.0 * PI * SWAY_FREQUENCY * t).sin();
                let g = STANDARD_GRAVITY + sway;
                (
                    [0.0, g * theta.sin(), g * theta.cos()],
                    [0.01 * (2.0 * PI * SWAY_FREQUENCY * t).cos(), 0.0, 0.0],
                )
            }
            Segment::Walk { amplitude, .. } => {
                let phase = 2.0 * PI * GAIT_FREQUENCY * t;
                (
                    [0.3 * amplitude * phase.cos(), 0.0, STANDARD_GRAVITY + amplitude * phase.sin()],
                    [0.4 * phase.cos(), 0.2 * phase.sin(), 0.1],
                )
            }
            Segment::Impact { peak, samples } => {
                let spin = if samples > 0 { index as f64 / samples as f64 } else { 0.0 };
                ([peak * 0.6, 0.0, peak * 0.8], [3.0 + spin, 1.5, 0.5])
            }
        }
    }
}

/// Builder for scripted sample sequences.
#[derive(Debug, Clone, Default)]
pub struct ScenarioBuilder {
    segments: Vec<Segment>,
}

impl ScenarioBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn still(mut self, secs: f64, tilt_deg: f64) -> Self {
        self.segments.push(Segment::Still { secs, tilt_deg });
        self
    }

    pub fn walk(mut self, secs: f64, amplitude: f64) -> Self {
        self.segments.push(Segment::Walk { secs, amplitude });
        self
    }

    pub fn impact(mut self, samples: usize, peak: f64) -> Self {
        self.segments.push(Segment::Impact { samples, peak });
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Render every segment into samples starting at `start`.
    pub fn build(&self, rate_hz: f64, start: DateTime<Utc>) -> Vec<SensorSample> {
        let step = sample_period(rate_hz);
        let mut samples = Vec::new();
        let mut global = 0usize;

        for segment in &self.segments {
            for index in 0..segment.sample_count(rate_hz) {
                let (accel, gyro) = segment.render(index, global, rate_hz);
                let timestamp = start + step * global as i32;
                samples.push(SensorSample::new(timestamp, accel, gyro));
                global += 1;
            }
        }

        samples
    }

    /// The still segment used to continue streaming once the script is exhausted.
    fn tail_segment(&self) -> Segment {
        let tilt_deg = self
            .segments
            .iter()
            .rev()
            .find_map(|s| match *s {
                Segment::Still { tilt_deg, .. } => Some(tilt_deg),
                Segment::Walk { .. } => Some(0.0),
                Segment::Impact { .. } => None,
            })
            .unwrap_or(0.0);
        Segment::Still { secs: f64::INFINITY, tilt_deg }
    }
}

fn sample_period(rate_hz: f64) -> Duration {
    Duration::microseconds((1_000_000.0 / rate_hz).round() as i64)
}

/// Configuration for the streaming source.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Nominal sample rate (Hz)
    pub rate_hz: f64,
    /// Pace output at the sample rate instead of emitting as fast as possible
    pub realtime: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            rate_hz: 50.0,
            realtime: true,
        }
    }
}

/// Errors that can occur while starting a source.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("simulated source is already running")]
    AlreadyRunning,
    #[error("sample rate must be positive, got {0}")]
    InvalidRate(f64),
}

/// Streams a scripted scenario through a bounded channel.
pub struct SimulatedSource {
    config: SourceConfig,
    sender: Sender<SensorSample>,
    receiver: Receiver<SensorSample>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedSource {
    pub fn new(config: SourceConfig) -> Self {
        let (sender, receiver) = bounded(10_000);
        Self {
            config,
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Start streaming the script. Once the script is exhausted the source
    /// keeps emitting still samples in the final posture until stopped.
    pub fn start(&mut self, script: ScenarioBuilder) -> Result<(), SimulationError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(SimulationError::AlreadyRunning);
        }
        if self.config.rate_hz.is_nan() || self.config.rate_hz <= 0.0 {
            return Err(SimulationError::InvalidRate(self.config.rate_hz));
        }
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let sender = self.sender.clone();
        let rate_hz = self.config.rate_hz;
        let realtime = self.config.realtime;

        self.worker = Some(thread::spawn(move || {
            let start = Utc::now();
            let step = sample_period(rate_hz);
            let pace = std::time::Duration::from_secs_f64(1.0 / rate_hz);
            let scripted = script.build(rate_hz, start);
            let tail = script.tail_segment();
            let mut global = 0usize;

            while running.load(Ordering::SeqCst) {
                let sample = match scripted.get(global) {
                    Some(s) => *s,
                    None => {
                        let (accel, gyro) = tail.render(0, global, rate_hz);
                        SensorSample::new(start + step * global as i32, accel, gyro)
                    }
                };
                if sender.send(sample).is_err() {
                    break;
                }
                global += 1;
                if realtime {
                    thread::sleep(pace);
                }
            }
        }));

        tracing::debug!(rate_hz, realtime, "simulated source started");
        Ok(())
    }

    /// Stop streaming and join the worker thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        // Unblock a worker waiting on a full channel.
        while self.receiver.try_recv().is_ok() {}
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn receiver(&self) -> &Receiver<SensorSample> {
        &self.receiver
    }

    pub fn try_recv(&self) -> Option<SensorSample> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for SimulatedSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sample_count_and_spacing() {
        let start = Utc::now();
        let samples = ScenarioBuilder::new().still(1.0, 0.0).impact(3, 20.0).build(50.0, start);
        assert_eq!(samples.len(), 53);
        assert_eq!(samples[1].timestamp - samples[0].timestamp, Duration::milliseconds(20));
        assert!((samples[51].magnitude() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_lying_segment_moves_gravity_off_z() {
        let samples = ScenarioBuilder::new().still(0.2, 90.0).build(50.0, Utc::now());
        for s in samples {
            assert!(s.az.abs() < 1e-6);
            assert!(s.ay > 9.0);
        }
    }

    #[test]
    fn test_stream_delivers_samples() {
        let mut source = SimulatedSource::new(SourceConfig {
            rate_hz: 100.0,
            realtime: false,
        });
        source.start(Scenario::Standing.builder()).unwrap();
        let first = source
            .receiver()
            .recv_timeout(std::time::Duration::from_secs(1))
            .unwrap();
        assert!((first.magnitude() - STANDARD_GRAVITY).abs() < 0.1);
        assert!(matches!(
            source.start(Scenario::Standing.builder()),
            Err(SimulationError::AlreadyRunning)
        ));
        source.stop();
        assert!(!source.is_running());
    }
}
