//! Risk scoring.
//!
//! The engine scores every feature vector through a [`RiskScorer`]. The
//! default scorer, [`RiskModel`], is a weighted sum of five components, each
//! clamped to [0, 1] and monotonic in its input:
//!
//! | component  | input                                 | weight |
//! |------------|---------------------------------------|--------|
//! | impact     | spike peak above the recovery level   | 0.35   |
//! | severity   | spike peak above the spike threshold  | 0.25   |
//! | inactivity | time spent quiet                      | 0.10   |
//! | posture    | tilt from vertical                    | 0.25   |
//! | recency    | time since the last confirmed fall    | 0.05   |
//!
//! Impact saturates at the spike threshold; severity keeps rising until the
//! configured critical impact, so only hard impacts reach the critical tier.

use crate::config::{ConfirmationWindows, RiskTiers, Thresholds};
use crate::core::features::FeatureVector;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const IMPACT_WEIGHT: f64 = 0.35;
const SEVERITY_WEIGHT: f64 = 0.25;
const INACTIVITY_WEIGHT: f64 = 0.10;
const POSTURE_WEIGHT: f64 = 0.25;
const RECENCY_WEIGHT: f64 = 0.05;

/// Risk tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Map a score in [0, 1] to a tier.
    pub fn from_score(score: f64, tiers: &RiskTiers) -> Self {
        if score >= tiers.critical {
            RiskLevel::Critical
        } else if score >= tiers.high {
            RiskLevel::High
        } else if score >= tiers.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One weighted component of a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskContribution {
    pub name: String,
    /// Weighted contribution to the score
    pub value: f64,
}

/// Risk tier plus the evidence behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub score: f64,
    /// Non-zero components, largest first
    pub contributing_features: Vec<RiskContribution>,
    pub timestamp: DateTime<Utc>,
}

impl RiskAssessment {
    /// Raise the tier to at least `floor`, keeping the score.
    pub fn floored(mut self, floor: RiskLevel) -> Self {
        self.level = self.level.max(floor);
        self
    }
}

/// Raw inputs to the score.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RiskInputs {
    /// Peak magnitude of the incident in progress (m/s²), 0 if none
    pub impact_peak: f64,
    /// Seconds of continuous quiet motion
    pub quiet_secs: f64,
    /// Tilt from vertical (degrees)
    pub tilt_deg: f64,
    /// Seconds since the last confirmed fall, if any
    pub since_incident_secs: Option<f64>,
}

/// Turns engine evidence into a risk assessment.
///
/// Implementations must be monotonic in the impact, inactivity and posture
/// inputs and must return a score in [0, 1]. The engine applies its own tier
/// floors on top of the returned level.
pub trait RiskScorer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Score `inputs` for the vector `features` at `timestamp`.
    fn assess(
        &self,
        inputs: &RiskInputs,
        features: &FeatureVector,
        timestamp: DateTime<Utc>,
    ) -> RiskAssessment;
}

/// Scoring parameters resolved from a subject's configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskModel {
    pub spike_threshold: f64,
    pub recovery_threshold: f64,
    /// Impact magnitude at which the severity component saturates
    pub critical_impact: f64,
    pub inactivity_horizon_secs: f64,
    pub incident_memory_secs: f64,
    pub tiers: RiskTiers,
}

impl RiskModel {
    pub fn new(thresholds: &Thresholds, timing: &ConfirmationWindows) -> Self {
        Self {
            spike_threshold: thresholds.spike_threshold,
            recovery_threshold: thresholds.recovery_threshold,
            critical_impact: thresholds.critical_impact,
            inactivity_horizon_secs: timing.inactivity_horizon.as_secs_f64(),
            incident_memory_secs: timing.incident_memory.as_secs_f64(),
            tiers: thresholds.risk_tiers,
        }
    }

    /// Score the inputs at `timestamp`.
    pub fn assess(&self, inputs: &RiskInputs, timestamp: DateTime<Utc>) -> RiskAssessment {
        let impact = unit(
            (inputs.impact_peak - self.recovery_threshold)
                / (self.spike_threshold - self.recovery_threshold),
        );
        let severity = unit(
            (inputs.impact_peak - self.spike_threshold)
                / (self.critical_impact - self.spike_threshold),
        );
        let inactivity = unit(inputs.quiet_secs / self.inactivity_horizon_secs);
        let posture = unit(inputs.tilt_deg / 90.0);
        let recency = inputs
            .since_incident_secs
            .map(|t| (-t.max(0.0) / self.incident_memory_secs).exp())
            .unwrap_or(0.0);

        let mut contributing_features: Vec<RiskContribution> = [
            ("impact", IMPACT_WEIGHT * impact),
            ("severity", SEVERITY_WEIGHT * severity),
            ("inactivity", INACTIVITY_WEIGHT * inactivity),
            ("posture", POSTURE_WEIGHT * posture),
            ("recency", RECENCY_WEIGHT * recency),
        ]
        .into_iter()
        .filter(|(_, value)| *value > 0.0)
        .map(|(name, value)| RiskContribution {
            name: name.to_string(),
            value,
        })
        .collect();

        let score = unit(contributing_features.iter().map(|c| c.value).sum());
        contributing_features.sort_by(|a, b| b.value.total_cmp(&a.value));

        RiskAssessment {
            level: RiskLevel::from_score(score, &self.tiers),
            score,
            contributing_features,
            timestamp,
        }
    }
}

impl RiskScorer for RiskModel {
    fn name(&self) -> &str {
        "weighted"
    }

    fn assess(
        &self,
        inputs: &RiskInputs,
        _features: &FeatureVector,
        timestamp: DateTime<Utc>,
    ) -> RiskAssessment {
        RiskModel::assess(self, inputs, timestamp)
    }
}

impl Default for RiskModel {
    fn default() -> Self {
        Self::new(&Thresholds::default(), &ConfirmationWindows::default())
    }
}

/// Clamp to [0, 1], mapping NaN to 0.
fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tier_cut_points() {
        let tiers = RiskTiers::default();
        assert_eq!(RiskLevel::from_score(0.0, &tiers), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.29, &tiers), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.3, &tiers), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.6, &tiers), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.8, &tiers), RiskLevel::Critical);
    }

    #[test]
    fn test_quiet_upright_wearer_is_low() {
        let model = RiskModel::default();
        let assessment = model.assess(
            &RiskInputs {
                quiet_secs: 60.0,
                tilt_deg: 3.0,
                ..Default::default()
            },
            Utc::now(),
        );
        assert_eq!(assessment.level, RiskLevel::Low);
        assert_eq!(assessment.contributing_features[0].name, "inactivity");
    }

    #[test]
    fn test_fall_at_spike_threshold_is_high() {
        let model = RiskModel::default();
        let assessment = model.assess(
            &RiskInputs {
                impact_peak: 20.0,
                quiet_secs: 1.6,
                tilt_deg: 90.0,
                since_incident_secs: None,
            },
            Utc::now(),
        );
        assert_eq!(assessment.level, RiskLevel::High);
        assert_eq!(assessment.contributing_features[0].name, "impact");
    }

    #[test]
    fn test_harder_impact_scores_higher() {
        let model = RiskModel::default();
        let score_at = |impact_peak| {
            model.assess(
                &RiskInputs {
                    impact_peak,
                    quiet_secs: 1.2,
                    tilt_deg: 90.0,
                    since_incident_secs: None,
                },
                Utc::now(),
            )
        };

        let moderate = score_at(20.0);
        let hard = score_at(30.0);
        let severe = score_at(60.0);
        assert!(moderate.score < hard.score);
        assert!(hard.score < severe.score);
        assert_eq!(moderate.level, RiskLevel::High);
        assert_eq!(severe.level, RiskLevel::Critical);
        // Saturates at the critical impact.
        assert_eq!(severe.score, score_at(150.0).score);
    }

    #[test]
    fn test_floor_only_raises() {
        let model = RiskModel::default();
        let low = model.assess(&RiskInputs::default(), Utc::now());
        assert_eq!(low.clone().floored(RiskLevel::High).level, RiskLevel::High);

        let critical = model.assess(
            &RiskInputs {
                impact_peak: 30.0,
                quiet_secs: 30.0,
                tilt_deg: 90.0,
                since_incident_secs: Some(0.0),
            },
            Utc::now(),
        );
        assert_eq!(critical.level, RiskLevel::Critical);
        assert_eq!(critical.floored(RiskLevel::Medium).level, RiskLevel::Critical);
    }

    fn inputs() -> impl Strategy<Value = RiskInputs> {
        (
            0.0..80.0f64,
            0.0..30.0f64,
            0.0..90.0f64,
            proptest::option::of(0.0..2000.0f64),
        )
            .prop_map(|(impact_peak, quiet_secs, tilt_deg, since_incident_secs)| RiskInputs {
                impact_peak,
                quiet_secs,
                tilt_deg,
                since_incident_secs,
            })
    }

    proptest! {
        #[test]
        fn score_is_monotonic_in_each_component(base in inputs(), delta in 0.0..20.0f64) {
            let model = RiskModel::default();
            let now = Utc::now();
            let score = |i: RiskInputs| model.assess(&i, now).score;
            let level = |i: RiskInputs| model.assess(&i, now).level;
            let reference = score(base);

            let more_impact = RiskInputs { impact_peak: base.impact_peak + delta, ..base };
            let more_quiet = RiskInputs { quiet_secs: base.quiet_secs + delta, ..base };
            let more_tilt = RiskInputs { tilt_deg: base.tilt_deg + delta, ..base };
            prop_assert!(score(more_impact) >= reference);
            prop_assert!(score(more_quiet) >= reference);
            prop_assert!(score(more_tilt) >= reference);
            prop_assert!(level(more_impact) >= level(base));

            if let Some(since) = base.since_incident_secs {
                let older = RiskInputs { since_incident_secs: Some(since + delta), ..base };
                prop_assert!(score(older) <= reference);
            }
        }

        #[test]
        fn score_stays_in_unit_interval(i in inputs()) {
            let score = RiskModel::default().assess(&i, Utc::now()).score;
            prop_assert!((0.0..=1.0).contains(&score));
        }
    }
}
