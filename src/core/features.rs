//! Feature computation from sample windows.
//!
//! Every emission produces one fixed-size [`FeatureVector`] of 22 named
//! scalars. All features are computed from the window contents only, except
//! `smoothed_magnitude`, an exponential moving average owned by the
//! [`FeatureExtractor`] instance.

use crate::config::{SamplingConfig, Thresholds};
use crate::core::windowing::{PushOutcome, SampleWindow};
use crate::source::types::SensorSample;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{debug, warn};

/// Number of features in a [`FeatureVector`].
pub const FEATURE_COUNT: usize = 22;

/// Feature names, in [`FeatureVector::as_array`] order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "magnitude_mean",
    "magnitude_variance",
    "magnitude_max",
    "magnitude_min",
    "jerk_mean",
    "jerk_max",
    "acceleration_energy",
    "gravity_x",
    "gravity_y",
    "gravity_z",
    "tilt_angle",
    "posture",
    "gyro_energy",
    "gyro_max",
    "gyro_variance",
    "spike_count",
    "inactivity_ratio",
    "recent_magnitude_mean",
    "recent_magnitude_variance",
    "recent_magnitude_max",
    "smoothed_magnitude",
    "instability_index",
];

/// Reference magnitude variance for the instability index ((m/s²)²).
const INSTABILITY_VARIANCE_REF: f64 = 2.0;

/// Reference mean jerk for the instability index (m/s³).
const INSTABILITY_JERK_REF: f64 = 40.0;

/// Weight of the smoothed-magnitude EMA update.
const SMOOTHING_ALPHA: f64 = 0.2;

/// Coarse body posture derived from the gravity tilt angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Posture {
    Upright,
    Reclined,
    Lying,
}

impl Posture {
    pub fn from_tilt(tilt_deg: f64, upright_below: f64, lying_from: f64) -> Self {
        if tilt_deg >= lying_from {
            Posture::Lying
        } else if tilt_deg < upright_below {
            Posture::Upright
        } else {
            Posture::Reclined
        }
    }

    /// Numeric encoding used inside the feature vector.
    pub fn as_feature(self) -> f64 {
        match self {
            Posture::Upright => 0.0,
            Posture::Reclined => 1.0,
            Posture::Lying => 2.0,
        }
    }

    pub fn from_feature(value: f64) -> Self {
        if value >= 1.5 {
            Posture::Lying
        } else if value >= 0.5 {
            Posture::Reclined
        } else {
            Posture::Upright
        }
    }
}

/// Fixed-size descriptor of one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Timestamp of the newest sample in the window
    pub timestamp: DateTime<Utc>,

    // Acceleration magnitude statistics (m/s²)
    pub magnitude_mean: f64,
    pub magnitude_variance: f64,
    pub magnitude_max: f64,
    pub magnitude_min: f64,

    // Jerk, the time derivative of magnitude (m/s³)
    pub jerk_mean: f64,
    pub jerk_max: f64,

    /// Mean squared magnitude
    pub acceleration_energy: f64,

    // Low-pass gravity estimate in the device frame
    pub gravity_x: f64,
    pub gravity_y: f64,
    pub gravity_z: f64,

    /// Angle between the gravity estimate and the device Z axis, degrees
    pub tilt_angle: f64,
    /// Posture indicator (0 upright, 1 reclined, 2 lying)
    pub posture: f64,

    // Rotational statistics from the gyroscope
    pub gyro_energy: f64,
    pub gyro_max: f64,
    pub gyro_variance: f64,

    /// Samples at or above the spike threshold
    pub spike_count: f64,
    /// Fraction of hop-sized segments with variance below tolerance
    pub inactivity_ratio: f64,

    // Statistics of the samples that arrived since the previous emission
    pub recent_magnitude_mean: f64,
    pub recent_magnitude_variance: f64,
    pub recent_magnitude_max: f64,

    /// Exponential moving average of `recent_magnitude_mean`
    pub smoothed_magnitude: f64,
    /// Pre-fall instability in [0, 1]
    pub instability_index: f64,
}

impl FeatureVector {
    /// All features in [`FEATURE_NAMES`] order.
    pub fn as_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.magnitude_mean,
            self.magnitude_variance,
            self.magnitude_max,
            self.magnitude_min,
            self.jerk_mean,
            self.jerk_max,
            self.acceleration_energy,
            self.gravity_x,
            self.gravity_y,
            self.gravity_z,
            self.tilt_angle,
            self.posture,
            self.gyro_energy,
            self.gyro_max,
            self.gyro_variance,
            self.spike_count,
            self.inactivity_ratio,
            self.recent_magnitude_mean,
            self.recent_magnitude_variance,
            self.recent_magnitude_max,
            self.smoothed_magnitude,
            self.instability_index,
        ]
    }

    /// Look up a feature by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.as_array()[i])
    }

    pub fn posture(&self) -> Posture {
        Posture::from_feature(self.posture)
    }

    pub fn is_finite(&self) -> bool {
        self.as_array().iter().all(|v| v.is_finite())
    }
}

/// Parameters for the feature extractor.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Samples per window
    pub window_len: usize,
    /// New samples required between emissions
    pub hop_size: usize,
    pub staleness_bound: Duration,
    pub spike_threshold: f64,
    pub inactivity_tolerance: f64,
    pub upright_angle_deg: f64,
    pub lying_angle_deg: f64,
}

impl ExtractorConfig {
    pub fn new(sampling: &SamplingConfig, thresholds: &Thresholds) -> Self {
        Self {
            window_len: sampling.window_len(),
            hop_size: sampling.hop_size,
            staleness_bound: Duration::milliseconds(sampling.staleness_bound.as_millis() as i64),
            spike_threshold: thresholds.spike_threshold,
            inactivity_tolerance: thresholds.inactivity_tolerance,
            upright_angle_deg: thresholds.upright_angle_deg,
            lying_angle_deg: thresholds.lying_angle_deg,
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self::new(&SamplingConfig::default(), &Thresholds::default())
    }
}

/// Recoverable per-sample rejections.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractError {
    #[error("out-of-order sample at {timestamp} (latest {latest})")]
    OutOfOrderSample {
        timestamp: DateTime<Utc>,
        latest: DateTime<Utc>,
    },
    #[error("non-finite sample at {timestamp}")]
    NonFiniteSample { timestamp: DateTime<Utc> },
}

/// Per-subject feature extractor owning the window and smoothing state.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    config: ExtractorConfig,
    window: SampleWindow,
    smoothed_magnitude: Option<f64>,
    gap_resets: u64,
}

impl FeatureExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        let window = SampleWindow::new(config.window_len, config.staleness_bound);
        Self {
            config,
            window,
            smoothed_magnitude: None,
            gap_resets: 0,
        }
    }

    /// Append a sample and emit a feature vector once the window is full and
    /// a hop's worth of new samples has arrived.
    pub fn ingest(&mut self, sample: SensorSample) -> Result<Option<FeatureVector>, ExtractError> {
        if let Some(latest) = self.window.latest_timestamp() {
            if sample.timestamp <= latest {
                warn!(timestamp = %sample.timestamp, %latest, "dropping out-of-order sample");
                return Err(ExtractError::OutOfOrderSample {
                    timestamp: sample.timestamp,
                    latest,
                });
            }
        }
        if !sample.is_finite() {
            warn!(timestamp = %sample.timestamp, "dropping non-finite sample");
            return Err(ExtractError::NonFiniteSample {
                timestamp: sample.timestamp,
            });
        }

        if self.window.push(sample) == PushOutcome::GapReset {
            self.gap_resets += 1;
            debug!(timestamp = %sample.timestamp, "sample gap exceeded staleness bound, window reset");
        }

        if !self.window.is_full() || self.window.fresh_count() < self.config.hop_size {
            return Ok(None);
        }

        let features = compute_features(&self.window, &self.config, self.smoothed_magnitude);
        self.smoothed_magnitude = Some(features.smoothed_magnitude);
        self.window.mark_emitted();
        Ok(Some(features))
    }

    /// Number of times the window was cleared because of a sample gap.
    pub fn gap_resets(&self) -> u64 {
        self.gap_resets
    }

    pub fn window(&self) -> &SampleWindow {
        &self.window
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Clear window and smoothing state.
    pub fn reset(&mut self) {
        self.window.clear();
        self.smoothed_magnitude = None;
    }
}

/// Compute all features for the current window contents.
///
/// `previous_smoothed` is the extractor's carried EMA state; everything else is
/// derived from the window alone.
pub fn compute_features(
    window: &SampleWindow,
    config: &ExtractorConfig,
    previous_smoothed: Option<f64>,
) -> FeatureVector {
    let samples = window.samples();
    let timestamp = samples
        .back()
        .map(|s| s.timestamp)
        .unwrap_or_else(Utc::now);

    let magnitudes: Vec<f64> = samples.iter().map(SensorSample::magnitude).collect();
    let magnitude_mean = mean_or_zero(&magnitudes);
    let magnitude_variance = variance_or_zero(&magnitudes);
    let magnitude_max = max_or_zero(&magnitudes);
    let magnitude_min = min_or_zero(&magnitudes);
    let acceleration_energy = if magnitudes.is_empty() {
        0.0
    } else {
        magnitudes.iter().map(|m| m * m).mean()
    };

    let jerks = jerk_series(samples.iter());
    let jerk_mean = mean_or_zero(&jerks);
    let jerk_max = max_or_zero(&jerks);

    // Gravity estimate: moving average of the freshest hop.
    let recent: Vec<&SensorSample> = window.recent().collect();
    let gravity = average_accel(&recent);
    let tilt_angle = tilt_from_vertical(gravity);
    let posture = Posture::from_tilt(tilt_angle, config.upright_angle_deg, config.lying_angle_deg);

    let gyro: Vec<f64> = samples.iter().map(SensorSample::gyro_magnitude).collect();
    let gyro_energy = if gyro.is_empty() {
        0.0
    } else {
        gyro.iter().map(|w| w * w).mean()
    };
    let gyro_max = max_or_zero(&gyro);
    let gyro_variance = variance_or_zero(&gyro);

    let spike_count = magnitudes
        .iter()
        .filter(|&&m| m >= config.spike_threshold)
        .count() as f64;
    let inactivity_ratio =
        inactivity_ratio(&magnitudes, config.hop_size.max(2), config.inactivity_tolerance);

    let recent_magnitudes: Vec<f64> = recent.iter().map(|s| s.magnitude()).collect();
    let recent_magnitude_mean = mean_or_zero(&recent_magnitudes);
    let recent_magnitude_variance = variance_or_zero(&recent_magnitudes);
    let recent_magnitude_max = max_or_zero(&recent_magnitudes);

    let smoothed_magnitude = match previous_smoothed {
        Some(prev) => SMOOTHING_ALPHA * recent_magnitude_mean + (1.0 - SMOOTHING_ALPHA) * prev,
        None => recent_magnitude_mean,
    };

    let instability_index = 0.5 * saturating_risk(magnitude_variance, INSTABILITY_VARIANCE_REF)
        + 0.5 * saturating_risk(jerk_mean, INSTABILITY_JERK_REF);

    FeatureVector {
        timestamp,
        magnitude_mean,
        magnitude_variance,
        magnitude_max,
        magnitude_min,
        jerk_mean,
        jerk_max,
        acceleration_energy,
        gravity_x: gravity[0],
        gravity_y: gravity[1],
        gravity_z: gravity[2],
        tilt_angle,
        posture: posture.as_feature(),
        gyro_energy,
        gyro_max,
        gyro_variance,
        spike_count,
        inactivity_ratio,
        recent_magnitude_mean,
        recent_magnitude_variance,
        recent_magnitude_max,
        smoothed_magnitude,
        instability_index: instability_index.clamp(0.0, 1.0),
    }
}

/// Absolute rate of change of magnitude between consecutive samples.
fn jerk_series<'a>(samples: impl Iterator<Item = &'a SensorSample>) -> Vec<f64> {
    let samples: Vec<&SensorSample> = samples.collect();
    samples
        .windows(2)
        .filter_map(|pair| {
            let dt = (pair[1].timestamp - pair[0].timestamp).num_microseconds()? as f64 / 1e6;
            if dt > 0.0 {
                Some((pair[1].magnitude() - pair[0].magnitude()).abs() / dt)
            } else {
                None
            }
        })
        .collect()
}

fn average_accel(samples: &[&SensorSample]) -> [f64; 3] {
    if samples.is_empty() {
        return [0.0; 3];
    }
    let n = samples.len() as f64;
    let mut sum = [0.0; 3];
    for s in samples {
        sum[0] += s.ax;
        sum[1] += s.ay;
        sum[2] += s.az;
    }
    [sum[0] / n, sum[1] / n, sum[2] / n]
}

/// Angle between the gravity estimate and the device Z axis (degrees).
/// The sign of gravity is ignored so an inverted mount still reads upright.
fn tilt_from_vertical(gravity: [f64; 3]) -> f64 {
    let norm = (gravity[0].powi(2) + gravity[1].powi(2) + gravity[2].powi(2)).sqrt();
    if norm < 1e-6 {
        return 0.0;
    }
    (gravity[2].abs() / norm).clamp(0.0, 1.0).acos().to_degrees()
}

/// Fraction of `segment`-sized chunks whose variance stays below `tolerance`.
fn inactivity_ratio(magnitudes: &[f64], segment: usize, tolerance: f64) -> f64 {
    let chunks: Vec<&[f64]> = magnitudes
        .chunks(segment)
        .filter(|chunk| chunk.len() >= 2)
        .collect();
    if chunks.is_empty() {
        return 0.0;
    }
    let quiet = chunks
        .iter()
        .filter(|chunk| chunk.iter().population_variance() < tolerance)
        .count();
    quiet as f64 / chunks.len() as f64
}

/// Linear up to `reference` (reaching 0.5), then saturating towards 1.
fn saturating_risk(value: f64, reference: f64) -> f64 {
    if value <= reference {
        (value / reference * 0.5).max(0.0)
    } else {
        0.5 + 0.5 * (1.0 - (-(value - reference) / reference).exp())
    }
}

fn mean_or_zero(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().mean()
    }
}

fn variance_or_zero(values: &[f64]) -> f64 {
    if values.len() < 2 {
        0.0
    } else {
        values.iter().population_variance()
    }
}

fn max_or_zero(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::max).unwrap_or(0.0)
}

fn min_or_zero(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::min).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::simulated::ScenarioBuilder;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn run(samples: &[SensorSample]) -> Vec<FeatureVector> {
        let mut extractor = FeatureExtractor::new(ExtractorConfig::default());
        samples
            .iter()
            .filter_map(|s| extractor.ingest(*s).unwrap())
            .collect()
    }

    #[test]
    fn test_no_emission_until_window_full() {
        let samples = ScenarioBuilder::new().still(0.9, 0.0).build(50.0, start());
        assert!(run(&samples).is_empty());
    }

    #[test]
    fn test_emission_follows_hop() {
        // 50-sample window, 10-sample hop: 50, 60, 70, 80, 90, 100
        let samples = ScenarioBuilder::new().still(2.0, 0.0).build(50.0, start());
        assert_eq!(run(&samples).len(), 6);
    }

    #[test]
    fn test_standing_features() {
        let samples = ScenarioBuilder::new().still(2.0, 0.0).build(50.0, start());
        let fv = *run(&samples).last().unwrap();

        assert!((fv.magnitude_mean - 9.80665).abs() < 0.1);
        assert!(fv.magnitude_variance < 0.01);
        assert!(fv.tilt_angle < 5.0);
        assert_eq!(fv.posture(), Posture::Upright);
        assert_eq!(fv.spike_count, 0.0);
        assert_eq!(fv.inactivity_ratio, 1.0);
        assert!(fv.instability_index < 0.1);
    }

    #[test]
    fn test_lying_tilt() {
        let samples = ScenarioBuilder::new().still(2.0, 90.0).build(50.0, start());
        let fv = *run(&samples).last().unwrap();
        assert!(fv.tilt_angle > 85.0);
        assert_eq!(fv.posture(), Posture::Lying);
    }

    #[test]
    fn test_spike_counted_once_in_recent() {
        let samples = ScenarioBuilder::new()
            .still(1.0, 0.0)
            .impact(3, 20.0)
            .still(0.14, 90.0)
            .build(50.0, start());
        let vectors = run(&samples);
        // Emissions at 50 and 60 samples; the spike lands in the second hop.
        assert_eq!(vectors.len(), 2);
        assert!(vectors[0].recent_magnitude_max < 18.0);
        assert!(vectors[1].recent_magnitude_max >= 18.0);
        assert_eq!(vectors[1].spike_count, 3.0);
    }

    #[test]
    fn test_out_of_order_sample_rejected() {
        let samples = ScenarioBuilder::new().still(0.1, 0.0).build(50.0, start());
        let mut extractor = FeatureExtractor::new(ExtractorConfig::default());
        extractor.ingest(samples[2]).unwrap();

        let err = extractor.ingest(samples[1]).unwrap_err();
        assert!(matches!(err, ExtractError::OutOfOrderSample { .. }));
        // Duplicate timestamps are rejected as well.
        assert!(extractor.ingest(samples[2]).is_err());
        assert_eq!(extractor.window().len(), 1);
    }

    #[test]
    fn test_determinism() {
        let samples = ScenarioBuilder::new()
            .still(1.0, 0.0)
            .walk(2.0, 2.0)
            .impact(3, 20.0)
            .still(2.0, 90.0)
            .build(50.0, start());
        assert_eq!(run(&samples), run(&samples));
    }

    #[test]
    fn test_walking_is_active() {
        let samples = ScenarioBuilder::new().walk(2.0, 2.0).build(50.0, start());
        let fv = *run(&samples).last().unwrap();
        assert!(fv.magnitude_variance > 0.3);
        assert!(fv.jerk_mean > 0.0);
        assert!(fv.inactivity_ratio < 0.5);
    }

    #[test]
    fn test_feature_lookup_by_name() {
        let samples = ScenarioBuilder::new().still(1.0, 0.0).build(50.0, start());
        let fv = run(&samples)[0];
        assert_eq!(fv.get("tilt_angle"), Some(fv.tilt_angle));
        assert_eq!(fv.get("no_such_feature"), None);
        assert_eq!(FEATURE_NAMES.len(), fv.as_array().len());
    }
}
