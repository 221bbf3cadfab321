//! Fall decision engine.
//!
//! A per-subject state machine advanced once per feature vector:
//!
//! ```text
//! Normal ──spike──▶ SpikeDetected ──quiet──▶ PostureVerification ──lying──▶ FallConfirmed
//!   ▲  │                 │ bounce / timeout          │ upright / timeout        │
//!   │  └─instability─▶ PreFallWarning                ▼                          ▼
//!   └──────────────────────────────────────────── Normal ◀──recovery── PostFallMonitoring
//! ```
//!
//! [`next_step`] is a pure function of the current [`DetectionState`], the
//! incoming [`FeatureVector`] and the configuration. Time is taken from the
//! vector timestamps only, so replays are deterministic.

use crate::config::{ConfirmationWindows, SubjectConfig, Thresholds};
use crate::core::features::{FeatureVector, Posture};
use crate::core::risk::{RiskAssessment, RiskInputs, RiskLevel, RiskModel, RiskScorer};
use crate::source::types::{SubjectId, STANDARD_GRAVITY};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Allowed deviation of the gravity estimate from 1 g before a resting
/// device is considered off-body (m/s²).
const GRAVITY_TOLERANCE: f64 = 4.0;

/// Inactivity ratio that confirms a fall when posture stays ambiguous.
const TIMEOUT_INACTIVITY_RATIO: f64 = 0.5;

/// Engine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Normal,
    PreFallWarning,
    SpikeDetected,
    PostureVerification,
    FallConfirmed,
    PostFallMonitoring,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Normal => "normal",
            EngineState::PreFallWarning => "pre_fall_warning",
            EngineState::SpikeDetected => "spike_detected",
            EngineState::PostureVerification => "posture_verification",
            EngineState::FallConfirmed => "fall_confirmed",
            EngineState::PostFallMonitoring => "post_fall_monitoring",
        }
    }

    /// Whether an impact is being evaluated or has been confirmed.
    pub fn is_incident(&self) -> bool {
        matches!(
            self,
            EngineState::SpikeDetected
                | EngineState::PostureVerification
                | EngineState::FallConfirmed
                | EngineState::PostFallMonitoring
        )
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of detection events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionKind {
    FallConfirmed,
    PreFallWarning,
    WearAnomaly,
}

impl DetectionKind {
    /// Merge priority; the higher kind wins when events are combined.
    pub fn priority(&self) -> u8 {
        match self {
            DetectionKind::FallConfirmed => 2,
            DetectionKind::PreFallWarning => 1,
            DetectionKind::WearAnomaly => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionKind::FallConfirmed => "fall_confirmed",
            DetectionKind::PreFallWarning => "pre_fall_warning",
            DetectionKind::WearAnomaly => "wear_anomaly",
        }
    }
}

impl std::fmt::Display for DetectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detection handed to the alert controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub subject_id: SubjectId,
    pub timestamp: DateTime<Utc>,
    pub kind: DetectionKind,
    pub risk: RiskAssessment,
    /// Feature vector that produced the event
    pub trigger: FeatureVector,
    /// Most recent upright-to-seated posture change, if any
    pub last_sit_down_at: Option<DateTime<Utc>>,
}

impl DetectionEvent {
    pub fn severity(&self) -> RiskLevel {
        self.risk.level
    }
}

/// A state change, reported for logging and auditing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub from: EngineState,
    pub to: EngineState,
    pub at: DateTime<Utc>,
    pub reason: &'static str,
}

/// Coarse motion class of one feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionClass {
    /// A fresh sample reached the spike threshold
    Impact,
    /// Low variance at or below the recovery level
    Quiet,
    /// Anything else
    Active,
}

impl MotionClass {
    pub fn classify(features: &FeatureVector, thresholds: &Thresholds) -> Self {
        if features.recent_magnitude_max >= thresholds.spike_threshold {
            MotionClass::Impact
        } else if features.recent_magnitude_variance <= thresholds.inactivity_tolerance
            && features.recent_magnitude_mean <= thresholds.recovery_threshold
        {
            MotionClass::Quiet
        } else {
            MotionClass::Active
        }
    }
}

/// Resolved per-subject engine parameters.
#[derive(Clone)]
pub struct EngineConfig {
    pub thresholds: Thresholds,
    pub timing: ConfirmationWindows,
    pub scorer: Arc<dyn RiskScorer>,
}

impl EngineConfig {
    /// Parameters for `subject`, scored by the weighted [`RiskModel`].
    pub fn new(subject: &SubjectConfig) -> Self {
        Self {
            thresholds: subject.thresholds.clone(),
            timing: subject.timing.clone(),
            scorer: Arc::new(RiskModel::new(&subject.thresholds, &subject.timing)),
        }
    }

    /// Replace the risk scorer.
    pub fn with_scorer(mut self, scorer: Arc<dyn RiskScorer>) -> Self {
        self.scorer = scorer;
        self
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("thresholds", &self.thresholds)
            .field("timing", &self.timing)
            .field("scorer", &self.scorer.name())
            .finish()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(&SubjectConfig::default())
    }
}

/// Everything the engine remembers between vectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionState {
    pub state: EngineState,
    /// When the current state was entered
    pub entered_at: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,

    /// Latest impact of the incident in progress
    pub spike_at: Option<DateTime<Utc>>,
    /// Peak magnitude of the incident in progress, 0 outside incidents
    pub impact_peak: f64,

    // Start of the current streak of each condition
    pub quiet_since: Option<DateTime<Utc>>,
    pub lying_since: Option<DateTime<Utc>>,
    pub not_lying_since: Option<DateTime<Utc>>,
    pub recovering_since: Option<DateTime<Utc>>,
    pub unstable_since: Option<DateTime<Utc>>,
    pub calm_since: Option<DateTime<Utc>>,
    pub off_body_since: Option<DateTime<Utc>>,

    pub prefall_reported: bool,
    pub wear_reported: bool,

    pub last_posture: Option<Posture>,
    pub last_sit_down_at: Option<DateTime<Utc>>,
    pub last_confirmed_at: Option<DateTime<Utc>>,

    /// Set while the latest vector carried non-finite features
    pub degraded: bool,
}

impl DetectionState {
    /// Time spent in continuous quiet motion as of `now`.
    pub fn quiet_for(&self, now: DateTime<Utc>) -> Duration {
        self.quiet_since
            .map(|since| now - since)
            .unwrap_or_else(Duration::zero)
    }

    fn enter(&mut self, to: EngineState, at: DateTime<Utc>, reason: &'static str) -> Transition {
        let from = self.state;
        self.state = to;
        self.entered_at = Some(at);
        Transition { from, to, at, reason }
    }

    fn end_incident(&mut self) {
        self.spike_at = None;
        self.impact_peak = 0.0;
    }
}

/// Result of one pure engine step.
#[derive(Debug, Clone)]
pub struct Step {
    pub next: DetectionState,
    pub assessment: RiskAssessment,
    pub emit: Option<DetectionKind>,
    pub transition: Option<Transition>,
}

/// Advance the state machine by one feature vector.
pub fn next_step(state: &DetectionState, features: &FeatureVector, config: &EngineConfig) -> Step {
    let now = features.timestamp;
    let mut s = state.clone();
    s.last_update = Some(now);

    if !features.is_finite() {
        // Hold position; an incident in progress is never cleared here.
        s.degraded = true;
        let inputs = RiskInputs {
            impact_peak: s.impact_peak,
            quiet_secs: seconds(s.quiet_for(now)),
            tilt_deg: 0.0,
            since_incident_secs: s.last_confirmed_at.map(|t| seconds(now - t)),
        };
        let assessment = config
            .scorer
            .assess(&inputs, features, now)
            .floored(RiskLevel::High);
        return Step {
            next: s,
            assessment,
            emit: None,
            transition: None,
        };
    }
    s.degraded = false;

    let th = &config.thresholds;
    let timing = &config.timing;
    let class = MotionClass::classify(features, th);
    let posture = features.posture();

    s.quiet_since = streak(s.quiet_since, class == MotionClass::Quiet, now);
    s.lying_since = streak(s.lying_since, posture == Posture::Lying, now);
    s.not_lying_since = streak(s.not_lying_since, posture != Posture::Lying, now);
    s.recovering_since = streak(
        s.recovering_since,
        class == MotionClass::Active && posture == Posture::Upright,
        now,
    );
    s.unstable_since = streak(
        s.unstable_since,
        matches!(s.state, EngineState::Normal | EngineState::PreFallWarning)
            && class != MotionClass::Impact
            && posture == Posture::Upright
            && features.instability_index >= th.instability_threshold,
        now,
    );
    s.calm_since = streak(
        s.calm_since,
        features.instability_index < th.instability_threshold,
        now,
    );

    if class != MotionClass::Impact
        && s.last_posture == Some(Posture::Upright)
        && posture == Posture::Reclined
    {
        s.last_sit_down_at = Some(now);
    }
    s.last_posture = Some(posture);

    // Recency is judged against the previous confirmed fall, so an incident
    // does not score itself.
    let since_incident_secs = s.last_confirmed_at.map(|t| seconds(now - t));

    let mut emit = None;
    let transition = match s.state {
        EngineState::Normal => {
            if class == MotionClass::Impact {
                s.spike_at = Some(now);
                s.impact_peak = features.recent_magnitude_max;
                Some(s.enter(EngineState::SpikeDetected, now, "impact spike"))
            } else if held(s.unstable_since, now, timing.prefall_persistence) {
                s.prefall_reported = false;
                Some(s.enter(EngineState::PreFallWarning, now, "sustained instability"))
            } else {
                None
            }
        }
        EngineState::PreFallWarning => {
            if class == MotionClass::Impact {
                s.spike_at = Some(now);
                s.impact_peak = features.recent_magnitude_max;
                Some(s.enter(EngineState::SpikeDetected, now, "impact spike"))
            } else if held(s.calm_since, now, timing.prefall_clear) {
                Some(s.enter(EngineState::Normal, now, "instability subsided"))
            } else {
                if !s.prefall_reported && held(s.entered_at, now, timing.prefall_escalation) {
                    s.prefall_reported = true;
                    emit = Some(DetectionKind::PreFallWarning);
                }
                None
            }
        }
        EngineState::SpikeDetected => {
            if class == MotionClass::Impact {
                s.spike_at = Some(now);
                s.impact_peak = s.impact_peak.max(features.recent_magnitude_max);
                None
            } else if held(s.quiet_since, now, timing.inactivity_confirmation) {
                Some(s.enter(EngineState::PostureVerification, now, "inactive after impact"))
            } else if class == MotionClass::Active && held(s.spike_at, now, timing.impact_settle) {
                s.end_incident();
                Some(s.enter(EngineState::Normal, now, "motion resumed after impact"))
            } else if held(s.entered_at, now, timing.spike_timeout) {
                s.end_incident();
                Some(s.enter(EngineState::Normal, now, "spike unresolved"))
            } else {
                None
            }
        }
        EngineState::PostureVerification => {
            if class == MotionClass::Impact {
                s.spike_at = Some(now);
                s.impact_peak = s.impact_peak.max(features.recent_magnitude_max);
                Some(s.enter(EngineState::SpikeDetected, now, "repeated impact"))
            } else if held(s.lying_since, now, timing.posture_confirmation) {
                emit = Some(DetectionKind::FallConfirmed);
                Some(s.enter(EngineState::FallConfirmed, now, "lying after impact"))
            } else if held(s.not_lying_since, now, timing.posture_confirmation) {
                s.end_incident();
                Some(s.enter(EngineState::Normal, now, "upright after impact"))
            } else if held(s.entered_at, now, timing.posture_timeout) {
                if features.inactivity_ratio >= TIMEOUT_INACTIVITY_RATIO {
                    emit = Some(DetectionKind::FallConfirmed);
                    Some(s.enter(EngineState::FallConfirmed, now, "inactive at posture timeout"))
                } else {
                    s.end_incident();
                    Some(s.enter(EngineState::Normal, now, "posture unresolved"))
                }
            } else {
                None
            }
        }
        EngineState::FallConfirmed => {
            s.last_confirmed_at = s.entered_at;
            Some(s.enter(EngineState::PostFallMonitoring, now, "monitoring recovery"))
        }
        EngineState::PostFallMonitoring => {
            if held(s.recovering_since, now, timing.recovery_duration) {
                s.end_incident();
                Some(s.enter(EngineState::Normal, now, "sustained recovery"))
            } else {
                None
            }
        }
    };

    // Off-body detection only runs outside incidents.
    let off_body = is_off_body(features, class, th);
    s.off_body_since = streak(s.off_body_since, off_body, now);
    if !off_body {
        s.wear_reported = false;
    } else if emit.is_none()
        && s.state == EngineState::Normal
        && !s.wear_reported
        && held(s.off_body_since, now, timing.wear_anomaly_after)
    {
        s.wear_reported = true;
        emit = Some(DetectionKind::WearAnomaly);
    }

    let inputs = RiskInputs {
        impact_peak: s.impact_peak,
        quiet_secs: seconds(s.quiet_for(now)),
        tilt_deg: features.tilt_angle,
        since_incident_secs,
    };
    let mut assessment = config.scorer.assess(&inputs, features, now);
    if s.state == EngineState::PreFallWarning {
        assessment = assessment.floored(RiskLevel::Medium);
    }

    Step {
        next: s,
        assessment,
        emit,
        transition,
    }
}

/// Motion too flat for a worn device, or a resting gravity estimate far from 1 g.
fn is_off_body(features: &FeatureVector, class: MotionClass, th: &Thresholds) -> bool {
    let gravity = (features.gravity_x.powi(2) + features.gravity_y.powi(2) + features.gravity_z.powi(2))
        .sqrt();
    features.magnitude_variance.sqrt() < th.wear_motion_floor
        || (class == MotionClass::Quiet && (gravity - STANDARD_GRAVITY).abs() > GRAVITY_TOLERANCE)
}

/// Extend a condition streak, or end it.
fn streak(since: Option<DateTime<Utc>>, condition: bool, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if condition {
        Some(since.unwrap_or(now))
    } else {
        None
    }
}

/// Whether a streak started at `since` has lasted at least `duration`.
fn held(since: Option<DateTime<Utc>>, now: DateTime<Utc>, duration: std::time::Duration) -> bool {
    since
        .and_then(|since| (now - since).to_std().ok())
        .is_some_and(|elapsed| elapsed >= duration)
}

fn seconds(duration: Duration) -> f64 {
    duration.num_microseconds().unwrap_or(i64::MAX) as f64 / 1e6
}

/// Output of processing one feature vector.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub assessment: RiskAssessment,
    pub event: Option<DetectionEvent>,
    pub transition: Option<Transition>,
}

/// Per-subject decision engine.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    subject_id: SubjectId,
    config: EngineConfig,
    state: DetectionState,
    last_assessment: Option<RiskAssessment>,
}

impl DecisionEngine {
    pub fn new(subject_id: SubjectId, config: EngineConfig) -> Self {
        Self {
            subject_id,
            config,
            state: DetectionState::default(),
            last_assessment: None,
        }
    }

    /// Feed one feature vector through the state machine.
    pub fn process(&mut self, features: &FeatureVector) -> EngineOutput {
        let step = next_step(&self.state, features, &self.config);

        if step.next.degraded && !self.state.degraded {
            warn!(subject = %self.subject_id, timestamp = %features.timestamp, "non-finite features, holding state");
        }
        if let Some(transition) = &step.transition {
            info!(
                subject = %self.subject_id,
                from = %transition.from,
                to = %transition.to,
                reason = transition.reason,
                "state transition"
            );
        }

        let event = step.emit.map(|kind| DetectionEvent {
            subject_id: self.subject_id.clone(),
            timestamp: features.timestamp,
            kind,
            risk: step.assessment.clone(),
            trigger: *features,
            last_sit_down_at: step.next.last_sit_down_at,
        });
        if let Some(event) = &event {
            info!(
                subject = %self.subject_id,
                kind = %event.kind,
                severity = %event.severity(),
                score = event.risk.score,
                "detection event"
            );
        } else {
            debug!(subject = %self.subject_id, state = %step.next.state, level = %step.assessment.level, "vector processed");
        }

        self.state = step.next;
        self.last_assessment = Some(step.assessment.clone());

        EngineOutput {
            assessment: step.assessment,
            event,
            transition: step.transition,
        }
    }

    pub fn subject_id(&self) -> &SubjectId {
        &self.subject_id
    }

    pub fn state(&self) -> &DetectionState {
        &self.state
    }

    pub fn engine_state(&self) -> EngineState {
        self.state.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn last_assessment(&self) -> Option<&RiskAssessment> {
        self.last_assessment.as_ref()
    }

    /// How long a subject under post-fall monitoring has stayed inactive.
    /// `None` outside post-fall monitoring.
    pub fn inactive_for(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.state.state != EngineState::PostFallMonitoring {
            return None;
        }
        Some(self.state.quiet_for(now))
    }
}
