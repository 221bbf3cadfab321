//! Configuration for the fall guard agent.
//!
//! Thresholds are per subject: `defaults` applies to every subject unless a
//! full override is present in `subjects`. Every configuration is validated
//! before a pipeline is built; a non-monotonic threshold set is fatal for that
//! subject.

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sampling and windowing parameters shared by every subject
    pub sampling: SamplingConfig,

    /// Thresholds and policy applied to subjects without an override
    pub defaults: SubjectConfig,

    /// Per-subject overrides, keyed by subject id
    pub subjects: BTreeMap<String, SubjectConfig>,

    /// Delivery attempts per confirmed alert before surfacing a failure
    pub delivery_attempts: u32,

    /// Path for exporting alert archives
    pub export_path: PathBuf,

    /// Path for storing audit statistics
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fall-guard-agent");

        Self {
            sampling: SamplingConfig::default(),
            defaults: SubjectConfig::default(),
            subjects: BTreeMap::new(),
            delivery_attempts: 3,
            export_path: data_dir.join("exports"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fall-guard-agent")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Resolve the configuration for one subject.
    pub fn subject(&self, subject_id: &str) -> SubjectConfig {
        self.subjects
            .get(subject_id)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }

    /// Validate sampling, defaults and every override.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sampling.validate()?;
        if self.delivery_attempts == 0 {
            return Err(invalid("delivery_attempts must be at least 1"));
        }
        self.defaults.validate()?;
        for (id, subject) in &self.subjects {
            subject.validate().map_err(|e| match e {
                ConfigError::InvalidConfiguration(reason) => {
                    ConfigError::InvalidConfiguration(format!("subject {id}: {reason}"))
                }
                other => other,
            })?;
        }
        Ok(())
    }
}

/// Sampling and windowing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Nominal sample rate (Hz)
    pub sample_rate_hz: f64,

    /// Duration covered by one feature window
    #[serde(with = "duration_serde")]
    pub window_duration: Duration,

    /// New samples required between feature emissions
    pub hop_size: usize,

    /// Largest tolerated gap between consecutive samples
    #[serde(with = "duration_serde")]
    pub staleness_bound: Duration,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 50.0,
            window_duration: Duration::from_secs(1),
            hop_size: 10,
            staleness_bound: Duration::from_millis(500),
        }
    }
}

impl SamplingConfig {
    /// Number of samples held by one window.
    pub fn window_len(&self) -> usize {
        (self.window_duration.as_secs_f64() * self.sample_rate_hz).round() as usize
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.sample_rate_hz.is_finite() || self.sample_rate_hz <= 0.0 {
            return Err(invalid("sample_rate_hz must be positive"));
        }
        if self.window_len() < 2 {
            return Err(invalid("window must hold at least two samples"));
        }
        if self.hop_size == 0 || self.hop_size > self.window_len() {
            return Err(invalid("hop_size must be between 1 and the window length"));
        }
        let period = 1.0 / self.sample_rate_hz;
        if self.staleness_bound.as_secs_f64() <= period {
            return Err(invalid(format!(
                "staleness_bound ({:.3}s) must exceed the sample period ({:.3}s)",
                self.staleness_bound.as_secs_f64(),
                period
            )));
        }
        Ok(())
    }
}

/// Everything that can be overridden for a single subject.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectConfig {
    pub thresholds: Thresholds,
    pub timing: ConfirmationWindows,
    pub policy: AlertPolicy,
}

impl SubjectConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;
        self.timing.validate()?;
        self.policy.validate()?;
        Ok(())
    }
}

/// Detection thresholds. Accelerations are in m/s².
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Magnitude at or above which a sample counts as an impact spike
    pub spike_threshold: f64,
    /// Upper magnitude bound for a settled, post-impact wearer
    pub recovery_threshold: f64,
    /// Impact magnitude at which the severity of a spike saturates
    pub critical_impact: f64,
    /// Magnitude variance below which motion counts as inactive
    pub inactivity_tolerance: f64,
    /// Tilt from vertical (degrees) below which the wearer is upright
    pub upright_angle_deg: f64,
    /// Tilt from vertical (degrees) at or above which the wearer is lying
    pub lying_angle_deg: f64,
    /// Instability index that raises a pre-fall warning
    pub instability_threshold: f64,
    /// Magnitude standard deviation under which a device is considered unworn
    pub wear_motion_floor: f64,
    /// Risk tier cut points
    pub risk_tiers: RiskTiers,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            spike_threshold: 18.0,
            recovery_threshold: 12.0,
            critical_impact: 40.0,
            inactivity_tolerance: 0.3,
            upright_angle_deg: 30.0,
            lying_angle_deg: 60.0,
            instability_threshold: 0.6,
            wear_motion_floor: 0.01,
            risk_tiers: RiskTiers::default(),
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let values = [
            self.spike_threshold,
            self.recovery_threshold,
            self.critical_impact,
            self.inactivity_tolerance,
            self.upright_angle_deg,
            self.lying_angle_deg,
            self.instability_threshold,
            self.wear_motion_floor,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(invalid("thresholds must be finite"));
        }
        if self.recovery_threshold <= 0.0 {
            return Err(invalid("recovery_threshold must be positive"));
        }
        if self.recovery_threshold >= self.spike_threshold {
            return Err(invalid(format!(
                "recovery_threshold ({}) must be below spike_threshold ({})",
                self.recovery_threshold, self.spike_threshold
            )));
        }
        if self.critical_impact <= self.spike_threshold {
            return Err(invalid(format!(
                "critical_impact ({}) must be above spike_threshold ({})",
                self.critical_impact, self.spike_threshold
            )));
        }
        if self.inactivity_tolerance <= 0.0 {
            return Err(invalid("inactivity_tolerance must be positive"));
        }
        if !(0.0 < self.upright_angle_deg
            && self.upright_angle_deg < self.lying_angle_deg
            && self.lying_angle_deg <= 90.0)
        {
            return Err(invalid(
                "posture angles must satisfy 0 < upright_angle_deg < lying_angle_deg <= 90",
            ));
        }
        if !(0.0 < self.instability_threshold && self.instability_threshold <= 1.0) {
            return Err(invalid("instability_threshold must be in (0, 1]"));
        }
        if self.wear_motion_floor < 0.0 {
            return Err(invalid("wear_motion_floor must not be negative"));
        }
        self.risk_tiers.validate()
    }
}

/// Cut points mapping a risk score in [0, 1] to a tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskTiers {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskTiers {
    fn default() -> Self {
        Self {
            medium: 0.3,
            high: 0.6,
            critical: 0.8,
        }
    }
}

impl RiskTiers {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0 < self.medium
            && self.medium < self.high
            && self.high < self.critical
            && self.critical <= 1.0)
        {
            return Err(invalid(format!(
                "risk tiers must satisfy 0 < medium < high < critical <= 1, got {}/{}/{}",
                self.medium, self.high, self.critical
            )));
        }
        Ok(())
    }
}

/// Durations used by the decision engine's confirmation timers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationWindows {
    /// Time after a spike during which bouncing motion is not judged
    #[serde(with = "duration_serde")]
    pub impact_settle: Duration,
    /// Stillness required after a spike before checking posture
    #[serde(with = "duration_serde")]
    pub inactivity_confirmation: Duration,
    /// Give up on a spike that neither settles nor recovers
    #[serde(with = "duration_serde")]
    pub spike_timeout: Duration,
    /// Lying (or upright) posture must hold this long to decide
    #[serde(with = "duration_serde")]
    pub posture_confirmation: Duration,
    /// Decide on inactivity alone after this long in posture verification
    #[serde(with = "duration_serde")]
    pub posture_timeout: Duration,
    /// Sustained normal activity that ends post-fall monitoring
    #[serde(with = "duration_serde")]
    pub recovery_duration: Duration,
    /// Instability must persist this long to raise a pre-fall warning
    #[serde(with = "duration_serde")]
    pub prefall_persistence: Duration,
    /// Warning persisting this long emits a pre-fall event
    #[serde(with = "duration_serde")]
    pub prefall_escalation: Duration,
    /// Calm required to drop a pre-fall warning
    #[serde(with = "duration_serde")]
    pub prefall_clear: Duration,
    /// Motionless time after which the device is considered not worn
    #[serde(with = "duration_serde")]
    pub wear_anomaly_after: Duration,
    /// Horizon over which inactivity saturates the risk score
    #[serde(with = "duration_serde")]
    pub inactivity_horizon: Duration,
    /// Decay constant for the "recent incident" risk component
    #[serde(with = "duration_serde")]
    pub incident_memory: Duration,
}

impl Default for ConfirmationWindows {
    fn default() -> Self {
        Self {
            impact_settle: Duration::from_millis(400),
            inactivity_confirmation: Duration::from_secs(1),
            spike_timeout: Duration::from_secs(5),
            posture_confirmation: Duration::from_millis(600),
            posture_timeout: Duration::from_secs(5),
            recovery_duration: Duration::from_secs(5),
            prefall_persistence: Duration::from_secs(1),
            prefall_escalation: Duration::from_secs(3),
            prefall_clear: Duration::from_secs(1),
            wear_anomaly_after: Duration::from_secs(60),
            inactivity_horizon: Duration::from_secs(10),
            incident_memory: Duration::from_secs(600),
        }
    }
}

impl ConfirmationWindows {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("inactivity_confirmation", self.inactivity_confirmation),
            ("spike_timeout", self.spike_timeout),
            ("posture_confirmation", self.posture_confirmation),
            ("posture_timeout", self.posture_timeout),
            ("recovery_duration", self.recovery_duration),
            ("wear_anomaly_after", self.wear_anomaly_after),
            ("inactivity_horizon", self.inactivity_horizon),
            ("incident_memory", self.incident_memory),
        ];
        if let Some((name, _)) = required.iter().find(|(_, d)| d.is_zero()) {
            return Err(invalid(format!("{name} must be positive")));
        }
        if self.impact_settle >= self.spike_timeout {
            return Err(invalid("impact_settle must be shorter than spike_timeout"));
        }
        if self.inactivity_confirmation >= self.spike_timeout {
            return Err(invalid(
                "inactivity_confirmation must be shorter than spike_timeout",
            ));
        }
        if self.posture_confirmation >= self.posture_timeout {
            return Err(invalid(
                "posture_confirmation must be shorter than posture_timeout",
            ));
        }
        Ok(())
    }
}

/// Local-time window during which non-critical alerts are withheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl SleepWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Whether `time` falls inside the window. Windows may wrap past midnight.
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

/// Comfort and rate-limit policy for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertPolicy {
    /// Withhold non-critical alerts inside the sleep window
    pub sleep_suppression: bool,
    pub sleep_window: Option<SleepWindow>,
    /// IANA timezone used to evaluate the sleep window
    pub timezone: String,
    /// Withhold low-severity alerts right after sitting down
    pub sitting_filter: bool,
    #[serde(with = "duration_serde")]
    pub sit_transition_window: Duration,
    /// Minimum spacing between alerts of non-increasing severity
    #[serde(with = "duration_serde")]
    pub min_alert_interval: Duration,
    /// Grace period during which the wearer can cancel a pending alert
    #[serde(with = "duration_serde")]
    pub cancellation_window: Duration,
    /// Resolved alerts kept for lookups
    pub history_limit: usize,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            sleep_suppression: true,
            sleep_window: NaiveTime::from_hms_opt(22, 0, 0)
                .zip(NaiveTime::from_hms_opt(7, 0, 0))
                .map(|(start, end)| SleepWindow::new(start, end)),
            timezone: "UTC".to_string(),
            sitting_filter: true,
            sit_transition_window: Duration::from_secs(2),
            min_alert_interval: Duration::from_secs(30),
            cancellation_window: Duration::from_secs(10),
            history_limit: 64,
        }
    }
}

impl AlertPolicy {
    /// Parse the configured timezone.
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| invalid(format!("unknown timezone '{}'", self.timezone)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tz()?;
        if let Some(window) = self.sleep_window {
            if window.start == window.end {
                return Err(invalid("sleep window start and end must differ"));
            }
        }
        if self.cancellation_window.is_zero() {
            return Err(invalid("cancellation_window must be positive"));
        }
        if self.history_limit == 0 {
            return Err(invalid("history_limit must be at least 1"));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidConfiguration(reason.into())
}

/// Serde support for Duration as fractional seconds.
mod duration_serde {
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sampling.window_len(), 50);
        assert_eq!(config.defaults.thresholds.spike_threshold, 18.0);
        assert_eq!(config.defaults.policy.min_alert_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_non_monotonic_thresholds_rejected() {
        let mut thresholds = Thresholds::default();
        thresholds.recovery_threshold = 18.0;
        assert!(matches!(
            thresholds.validate(),
            Err(ConfigError::InvalidConfiguration(_))
        ));

        let mut tiers = RiskTiers::default();
        tiers.high = 0.9;
        assert!(tiers.validate().is_err());

        let mut thresholds = Thresholds::default();
        thresholds.critical_impact = thresholds.spike_threshold;
        assert!(matches!(
            thresholds.validate(),
            Err(ConfigError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_staleness_bound_must_exceed_sample_period() {
        let mut sampling = SamplingConfig::default();
        sampling.staleness_bound = Duration::from_millis(10);
        assert!(matches!(
            sampling.validate(),
            Err(ConfigError::InvalidConfiguration(reason)) if reason.contains("staleness_bound")
        ));

        // One full period leaves no room for jitter.
        sampling.staleness_bound = Duration::from_millis(20);
        assert!(sampling.validate().is_err());

        sampling.staleness_bound = Duration::from_millis(21);
        assert!(sampling.validate().is_ok());
    }

    #[test]
    fn test_subject_override_error_names_subject() {
        let mut config = Config::default();
        let mut subject = SubjectConfig::default();
        subject.policy.timezone = "Mars/Olympus".to_string();
        config.subjects.insert("bed-4".to_string(), subject);

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bed-4"));
    }

    #[test]
    fn test_subject_resolution_falls_back_to_defaults() {
        let mut config = Config::default();
        let mut subject = SubjectConfig::default();
        subject.thresholds.spike_threshold = 22.0;
        config.subjects.insert("a".to_string(), subject);

        assert_eq!(config.subject("a").thresholds.spike_threshold, 22.0);
        assert_eq!(config.subject("b").thresholds.spike_threshold, 18.0);
    }

    #[test]
    fn test_sleep_window_wraps_midnight() {
        let window = SleepWindow::new(
            NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        );
        assert!(window.contains(NaiveTime::from_hms_opt(23, 30, 0).unwrap()));
        assert!(window.contains(NaiveTime::from_hms_opt(3, 0, 0).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "defaults": { "policy": { "min_alert_interval": 45.5 } } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.defaults.policy.min_alert_interval,
            Duration::from_millis(45_500)
        );
        assert_eq!(config.sampling.hop_size, 10);
    }
}
