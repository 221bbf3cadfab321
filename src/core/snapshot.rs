//! Immutable per-subject snapshots for dashboards.
//!
//! Cross-subject views never touch live pipeline state; they read
//! [`SubjectSnapshot`] values built here and handed outward.

use crate::core::alerts::{Alert, AlertController, SuppressionStats};
use crate::core::engine::{DecisionEngine, EngineState};
use crate::core::risk::RiskAssessment;
use crate::source::types::SubjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The current snapshot format version.
pub const SNAPSHOT_VERSION: &str = "1.0";

/// The name of this producer.
pub const PRODUCER_NAME: &str = "fall-guard-agent";

/// Producer metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotProducer {
    /// Name of the producing software
    pub name: String,
    /// Version of the producing software
    pub version: String,
    /// Unique instance identifier
    pub instance_id: String,
    /// Host the agent runs on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// Point-in-time view of one subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectSnapshot {
    pub snapshot_version: String,
    pub subject_id: SubjectId,
    /// Timestamp of the last processed feature vector
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
    pub computed_at: DateTime<Utc>,
    pub producer: SnapshotProducer,
    pub state: EngineState,
    /// Set while the latest features were unusable
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskAssessment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_alert: Option<Alert>,
    /// Seconds of post-fall inactivity, while monitoring recovery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactive_secs: Option<f64>,
    pub last_sit_down_at: Option<DateTime<Utc>>,
    pub suppressions: SuppressionStats,
    /// Confirmed alerts awaiting delivery
    pub undelivered_alerts: usize,
}

/// Builder for subject snapshots.
pub struct SnapshotBuilder {
    instance_id: Uuid,
    host: Option<String>,
}

impl SnapshotBuilder {
    /// Create a builder with a unique instance ID.
    pub fn new() -> Self {
        let host = hostname::get()
            .ok()
            .map(|h| h.to_string_lossy().into_owned());
        Self {
            instance_id: Uuid::new_v4(),
            host,
        }
    }

    /// Get the instance ID.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Build a snapshot of one subject's engine and alert controller.
    pub fn build(&self, engine: &DecisionEngine, alerts: &AlertController) -> SubjectSnapshot {
        let state = engine.state();
        let observed_at = state.last_update;
        let inactive_secs = observed_at
            .and_then(|now| engine.inactive_for(now))
            .and_then(|d| d.to_std().ok())
            .map(|d| d.as_secs_f64());

        SubjectSnapshot {
            snapshot_version: SNAPSHOT_VERSION.to_string(),
            subject_id: engine.subject_id().clone(),
            observed_at,
            computed_at: Utc::now(),
            producer: SnapshotProducer {
                name: PRODUCER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                instance_id: self.instance_id.to_string(),
                host: self.host.clone(),
            },
            state: state.state,
            degraded: state.degraded,
            risk: engine.last_assessment().cloned(),
            pending_alert: alerts.pending().cloned(),
            inactive_secs,
            last_sit_down_at: state.last_sit_down_at,
            suppressions: alerts.stats(),
            undelivered_alerts: alerts.outbox_len(),
        }
    }

    /// Build and serialize a snapshot to JSON.
    pub fn build_json(&self, engine: &DecisionEngine, alerts: &AlertController) -> String {
        let snapshot = self.build(engine, alerts);
        serde_json::to_string_pretty(&snapshot).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlertPolicy;
    use crate::core::engine::EngineConfig;

    #[test]
    fn test_fresh_subject_snapshot() {
        let subject = SubjectId::from("ward-3");
        let engine = DecisionEngine::new(subject.clone(), EngineConfig::default());
        let alerts = AlertController::new(subject, AlertPolicy::default()).unwrap();

        let builder = SnapshotBuilder::new();
        let snapshot = builder.build(&engine, &alerts);

        assert_eq!(snapshot.snapshot_version, SNAPSHOT_VERSION);
        assert_eq!(snapshot.producer.name, PRODUCER_NAME);
        assert_eq!(snapshot.producer.instance_id, builder.instance_id().to_string());
        assert_eq!(snapshot.state, EngineState::Normal);
        assert!(snapshot.observed_at.is_none());
        assert!(snapshot.pending_alert.is_none());
        assert_eq!(snapshot.undelivered_alerts, 0);
    }

    #[test]
    fn test_snapshot_json_shape() {
        let subject = SubjectId::from("ward-3");
        let engine = DecisionEngine::new(subject.clone(), EngineConfig::default());
        let alerts = AlertController::new(subject, AlertPolicy::default()).unwrap();

        let json = SnapshotBuilder::new().build_json(&engine, &alerts);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["subject_id"], "ward-3");
        assert_eq!(value["state"], "normal");
        assert!(value.get("risk").is_none());
    }
}
