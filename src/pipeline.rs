//! Per-subject processing pipeline.
//!
//! One [`SubjectPipeline`] owns the window, the decision engine state and the
//! alert controller of a single subject. Stages run strictly in order on
//! every sample: extractor, engine, alert policy, then confirmation of any
//! expired pending alert.

use crate::audit::{create_shared_log, SharedAuditLog};
use crate::config::{Config, ConfigError, SamplingConfig, SubjectConfig};
use crate::core::alerts::{AcknowledgeError, Alert, AlertController, AlertState, CancelError};
use crate::core::engine::{DecisionEngine, EngineConfig, EngineOutput};
use crate::core::features::{ExtractError, ExtractorConfig, FeatureExtractor, FeatureVector};
use crate::core::risk::RiskScorer;
use crate::core::snapshot::{SnapshotBuilder, SubjectSnapshot};
use crate::delivery::{deliver_with_retry, AlertSink, DeliveryError, RiskSink};
use crate::source::types::{SensorSample, SubjectId};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// What one sample produced.
#[derive(Debug, Clone, Default)]
pub struct FeedOutcome {
    /// Feature vector emitted for this sample, if the hop completed
    pub features: Option<FeatureVector>,
    /// Engine output for that vector
    pub output: Option<EngineOutput>,
    /// Alert record created or suppressed by the event
    pub alert: Option<Alert>,
    /// Alerts whose cancellation window elapsed at this sample
    pub confirmed: Vec<Alert>,
}

/// Extractor, engine and alert controller for one subject.
pub struct SubjectPipeline {
    subject_id: SubjectId,
    extractor: FeatureExtractor,
    engine: DecisionEngine,
    alerts: AlertController,
    alert_sink: Arc<dyn AlertSink>,
    risk_sink: Option<Arc<dyn RiskSink>>,
    audit: SharedAuditLog,
    snapshots: Arc<SnapshotBuilder>,
    delivery_attempts: u32,
}

impl SubjectPipeline {
    /// Build a pipeline after validating the subject's configuration.
    pub fn new(
        subject_id: SubjectId,
        sampling: &SamplingConfig,
        subject: &SubjectConfig,
        alert_sink: Arc<dyn AlertSink>,
    ) -> Result<Self, ConfigError> {
        sampling.validate()?;
        subject.validate().map_err(|e| match e {
            ConfigError::InvalidConfiguration(reason) => {
                ConfigError::InvalidConfiguration(format!("subject {subject_id}: {reason}"))
            }
            other => other,
        })?;

        let extractor = FeatureExtractor::new(ExtractorConfig::new(sampling, &subject.thresholds));
        let engine = DecisionEngine::new(subject_id.clone(), EngineConfig::new(subject));
        let alerts = AlertController::new(subject_id.clone(), subject.policy.clone())?;

        Ok(Self {
            subject_id,
            extractor,
            engine,
            alerts,
            alert_sink,
            risk_sink: None,
            audit: create_shared_log(),
            snapshots: Arc::new(SnapshotBuilder::new()),
            delivery_attempts: 3,
        })
    }

    /// Build a pipeline from the agent configuration, applying any override
    /// for this subject.
    pub fn from_config(
        config: &Config,
        subject_id: SubjectId,
        alert_sink: Arc<dyn AlertSink>,
    ) -> Result<Self, ConfigError> {
        let subject = config.subject(subject_id.as_str());
        Ok(Self::new(subject_id, &config.sampling, &subject, alert_sink)?
            .with_delivery_attempts(config.delivery_attempts))
    }

    pub fn with_risk_sink(mut self, sink: Arc<dyn RiskSink>) -> Self {
        self.risk_sink = Some(sink);
        self
    }

    pub fn with_audit(mut self, audit: SharedAuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_snapshot_builder(mut self, builder: Arc<SnapshotBuilder>) -> Self {
        self.snapshots = builder;
        self
    }

    /// Replace the engine's risk scorer. Call before feeding samples.
    pub fn with_scorer(mut self, scorer: Arc<dyn RiskScorer>) -> Self {
        let config = self.engine.config().clone().with_scorer(scorer);
        self.engine = DecisionEngine::new(self.subject_id.clone(), config);
        self
    }

    pub fn with_delivery_attempts(mut self, attempts: u32) -> Self {
        self.delivery_attempts = attempts.max(1);
        self
    }

    /// Push one sample through every stage.
    ///
    /// Rejected samples are dropped and reported; the pipeline keeps running.
    pub fn feed(&mut self, sample: SensorSample) -> Result<FeedOutcome, ExtractError> {
        let resets_before = self.extractor.gap_resets();
        let features = match self.extractor.ingest(sample) {
            Ok(features) => features,
            Err(e) => {
                self.audit.record_rejected_sample();
                return Err(e);
            }
        };
        self.audit.record_sample();
        if self.extractor.gap_resets() > resets_before {
            self.audit.record_gap_reset();
        }

        let mut outcome = FeedOutcome {
            features,
            ..Default::default()
        };

        if let Some(vector) = features {
            self.audit.record_vector();
            let output = self.engine.process(&vector);
            if let Some(sink) = &self.risk_sink {
                sink.notify(&self.subject_id, &output.assessment);
            }
            if let Some(event) = &output.event {
                self.audit.record_event();
                outcome.alert = self.alerts.on_event(event);
                match outcome.alert.as_ref().map(|a| a.state) {
                    Some(AlertState::Suppressed) => self.audit.record_alert_suppressed(),
                    Some(_) => self.audit.record_alert_created(),
                    None => {}
                }
            }
            outcome.output = Some(output);
        }

        outcome.confirmed = self.confirm_expired(sample.timestamp);
        if let Err(e) = self.flush_deliveries() {
            warn!(subject = %self.subject_id, "delivery deferred: {e}");
        }
        Ok(outcome)
    }

    /// Confirm expired pending alerts and hand queued alerts to the sink.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<Vec<Alert>, DeliveryError> {
        let confirmed = self.confirm_expired(now);
        self.flush_deliveries()?;
        Ok(confirmed)
    }

    /// Cancel a pending alert on behalf of the wearer.
    pub fn cancel(
        &mut self,
        alert_id: Uuid,
        subject_id: &SubjectId,
        requested_at: DateTime<Utc>,
    ) -> Result<(), CancelError> {
        let confirmed_before = self.alerts.outbox_len();
        let result = self.alerts.cancel(alert_id, subject_id, requested_at);
        let confirmed_now = self.alerts.outbox_len().saturating_sub(confirmed_before);
        if confirmed_now > 0 {
            self.audit.record_alerts_confirmed(confirmed_now as u64);
        }
        if result.is_ok() {
            self.audit.record_alert_cancelled();
        }
        if let Err(e) = self.flush_deliveries() {
            warn!(subject = %self.subject_id, "delivery deferred: {e}");
        }
        result
    }

    /// Acknowledge a confirmed alert.
    pub fn acknowledge(&mut self, alert_id: Uuid, at: DateTime<Utc>) -> Result<(), AcknowledgeError> {
        self.alerts.acknowledge(alert_id, at)
    }

    /// Archive resolved records, then deliver confirmed alerts in order.
    ///
    /// Records the sink refuses to archive stay queued. Delivery stops at the
    /// first alert whose retries are exhausted; it stays queued and is retried
    /// on the next call.
    pub fn flush_deliveries(&mut self) -> Result<usize, DeliveryError> {
        let mut records = self.alerts.take_archived().into_iter();
        while let Some(record) = records.next() {
            if let Err(e) = self.alert_sink.archive(&record) {
                warn!(subject = %self.subject_id, alert = %record.id, "archival deferred: {e}");
                self.alerts
                    .requeue_archived(std::iter::once(record).chain(records.by_ref()));
                break;
            }
        }

        let mut delivered = 0;
        while let Some(alert) = self.alerts.next_delivery().cloned() {
            match deliver_with_retry(self.alert_sink.as_ref(), &alert, self.delivery_attempts) {
                Ok(()) => {
                    self.alerts.complete_delivery(alert.id);
                    self.audit.record_alert_delivered();
                    debug!(subject = %self.subject_id, alert = %alert.id, sink = self.alert_sink.name(), "alert delivered");
                    delivered += 1;
                }
                Err(e) => {
                    self.audit.record_delivery_failure();
                    error!(subject = %self.subject_id, alert = %alert.id, "{e}");
                    return Err(e);
                }
            }
        }
        Ok(delivered)
    }

    /// Immutable view for dashboards.
    pub fn snapshot(&self) -> SubjectSnapshot {
        self.snapshots.build(&self.engine, &self.alerts)
    }

    pub fn subject_id(&self) -> &SubjectId {
        &self.subject_id
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn alerts(&self) -> &AlertController {
        &self.alerts
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    pub fn audit(&self) -> &SharedAuditLog {
        &self.audit
    }

    fn confirm_expired(&mut self, now: DateTime<Utc>) -> Vec<Alert> {
        let confirmed = self.alerts.tick(now);
        if !confirmed.is_empty() {
            self.audit.record_alerts_confirmed(confirmed.len() as u64);
        }
        confirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::{DetectionKind, EngineState};
    use crate::delivery::MemorySink;
    use crate::source::simulated::Scenario;
    use chrono::TimeZone;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn pipeline(sink: Arc<MemorySink>) -> SubjectPipeline {
        SubjectPipeline::from_config(&Config::default(), SubjectId::from("p1"), sink).unwrap()
    }

    #[test]
    fn test_invalid_thresholds_are_fatal() {
        let mut subject = SubjectConfig::default();
        subject.thresholds.recovery_threshold = 25.0;
        let result = SubjectPipeline::new(
            SubjectId::from("p1"),
            &SamplingConfig::default(),
            &subject,
            Arc::new(MemorySink::new()),
        );
        match result {
            Err(ConfigError::InvalidConfiguration(reason)) => assert!(reason.contains("p1")),
            other => panic!("expected invalid configuration, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_fall_is_delivered_once() {
        let sink = Arc::new(MemorySink::new());
        let mut pipeline = pipeline(sink.clone());

        let mut created = Vec::new();
        for sample in Scenario::Fall.builder().build(50.0, noon()) {
            let outcome = pipeline.feed(sample).unwrap();
            created.extend(outcome.alert);
        }
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].kind, DetectionKind::FallConfirmed);

        // Feeding ends well past the cancellation window.
        pipeline.tick(noon() + chrono::Duration::seconds(30)).unwrap();
        pipeline.tick(noon() + chrono::Duration::seconds(31)).unwrap();
        let delivered = sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].id, created[0].id);
        assert_eq!(pipeline.engine().engine_state(), EngineState::PostFallMonitoring);
        assert_eq!(pipeline.audit().stats().alerts_delivered, 1);
    }

    #[test]
    fn test_rejected_sample_is_reported() {
        let mut pipeline = pipeline(Arc::new(MemorySink::new()));
        let samples = Scenario::Standing.builder().build(50.0, noon());
        pipeline.feed(samples[1]).unwrap();
        assert!(matches!(
            pipeline.feed(samples[0]),
            Err(ExtractError::OutOfOrderSample { .. })
        ));
        assert_eq!(pipeline.audit().stats().samples_rejected, 1);
        assert_eq!(pipeline.audit().stats().samples_ingested, 1);
    }

    #[test]
    fn test_snapshot_reflects_pending_alert() {
        let mut pipeline = pipeline(Arc::new(MemorySink::new()));
        let samples = Scenario::Fall.builder().build(50.0, noon());
        let mut pending = None;
        for sample in samples {
            if let Some(alert) = pipeline.feed(sample).unwrap().alert {
                pending = Some(alert);
                break;
            }
        }
        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.pending_alert.map(|a| a.id), pending.map(|a| a.id));
        assert_eq!(snapshot.state, EngineState::FallConfirmed);
    }
}
