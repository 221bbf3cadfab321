//! Multi-subject monitor.
//!
//! Routes samples and wearer requests to the pipeline that owns each
//! subject. Pipelines share nothing mutable; cross-subject views are built
//! from snapshots only.

use crate::audit::{create_shared_log, SharedAuditLog};
use crate::config::{Config, ConfigError};
use crate::core::alerts::{AcknowledgeError, Alert, CancelError};
use crate::core::features::ExtractError;
use crate::core::risk::RiskScorer;
use crate::core::snapshot::{SnapshotBuilder, SubjectSnapshot};
use crate::delivery::{AlertSink, RiskSink};
use crate::pipeline::{FeedOutcome, SubjectPipeline};
use crate::source::types::{SensorSample, SubjectId};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Errors from routing requests to subjects.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("unknown subject: {0}")]
    UnknownSubject(SubjectId),
    #[error("subject already registered: {0}")]
    AlreadyRegistered(SubjectId),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("sample rejected: {0}")]
    Rejected(#[from] ExtractError),
}

/// Owns one pipeline per monitored subject.
pub struct Monitor {
    config: Config,
    pipelines: BTreeMap<SubjectId, SubjectPipeline>,
    alert_sink: Arc<dyn AlertSink>,
    risk_sink: Option<Arc<dyn RiskSink>>,
    scorer: Option<Arc<dyn RiskScorer>>,
    audit: SharedAuditLog,
    snapshots: Arc<SnapshotBuilder>,
}

impl Monitor {
    /// Create a monitor after validating the whole configuration.
    pub fn new(config: Config, alert_sink: Arc<dyn AlertSink>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            pipelines: BTreeMap::new(),
            alert_sink,
            risk_sink: None,
            scorer: None,
            audit: create_shared_log(),
            snapshots: Arc::new(SnapshotBuilder::new()),
        })
    }

    pub fn with_risk_sink(mut self, sink: Arc<dyn RiskSink>) -> Self {
        self.risk_sink = Some(sink);
        self
    }

    pub fn with_audit(mut self, audit: SharedAuditLog) -> Self {
        self.audit = audit;
        self
    }

    /// Score every subject registered from now on with `scorer`.
    pub fn with_scorer(mut self, scorer: Arc<dyn RiskScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Start a session for `subject_id` using its configured thresholds.
    pub fn register(&mut self, subject_id: SubjectId) -> Result<(), MonitorError> {
        if self.pipelines.contains_key(&subject_id) {
            return Err(MonitorError::AlreadyRegistered(subject_id));
        }
        let pipeline = self.build_pipeline(subject_id.clone())?;
        info!(subject = %subject_id, "subject registered");
        self.pipelines.insert(subject_id, pipeline);
        Ok(())
    }

    /// Build a pipeline wired to this monitor's sinks without registering it.
    pub fn build_pipeline(&self, subject_id: SubjectId) -> Result<SubjectPipeline, ConfigError> {
        let mut pipeline =
            SubjectPipeline::from_config(&self.config, subject_id, Arc::clone(&self.alert_sink))?
                .with_audit(Arc::clone(&self.audit))
                .with_snapshot_builder(Arc::clone(&self.snapshots));
        if let Some(sink) = &self.risk_sink {
            pipeline = pipeline.with_risk_sink(Arc::clone(sink));
        }
        if let Some(scorer) = &self.scorer {
            pipeline = pipeline.with_scorer(Arc::clone(scorer));
        }
        Ok(pipeline)
    }

    /// End a subject's session, returning its pipeline.
    pub fn unregister(&mut self, subject_id: &SubjectId) -> Option<SubjectPipeline> {
        self.pipelines.remove(subject_id)
    }

    /// Route one sample to its subject's pipeline.
    pub fn feed(
        &mut self,
        subject_id: &SubjectId,
        sample: SensorSample,
    ) -> Result<FeedOutcome, MonitorError> {
        let pipeline = self
            .pipelines
            .get_mut(subject_id)
            .ok_or_else(|| MonitorError::UnknownSubject(subject_id.clone()))?;
        Ok(pipeline.feed(sample)?)
    }

    /// Cancel a pending alert. Unknown subjects report `NotFound`.
    pub fn cancel(
        &mut self,
        alert_id: Uuid,
        subject_id: &SubjectId,
        requested_at: DateTime<Utc>,
    ) -> Result<(), CancelError> {
        match self.pipelines.get_mut(subject_id) {
            Some(pipeline) => pipeline.cancel(alert_id, subject_id, requested_at),
            None => Err(CancelError::NotFound(alert_id)),
        }
    }

    pub fn acknowledge(
        &mut self,
        subject_id: &SubjectId,
        alert_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AcknowledgeError> {
        match self.pipelines.get_mut(subject_id) {
            Some(pipeline) => pipeline.acknowledge(alert_id, at),
            None => Err(AcknowledgeError::NotFound(alert_id)),
        }
    }

    /// Tick every pipeline. Delivery failures are logged and the affected
    /// alerts stay queued for the next tick.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Alert> {
        let mut confirmed = Vec::new();
        for (subject_id, pipeline) in &mut self.pipelines {
            match pipeline.tick(now) {
                Ok(alerts) => confirmed.extend(alerts),
                Err(e) => error!(subject = %subject_id, "{e}"),
            }
        }
        confirmed
    }

    pub fn snapshots(&self) -> Vec<SubjectSnapshot> {
        self.pipelines.values().map(SubjectPipeline::snapshot).collect()
    }

    pub fn subjects(&self) -> impl Iterator<Item = &SubjectId> {
        self.pipelines.keys()
    }

    pub fn pipeline(&self, subject_id: &SubjectId) -> Option<&SubjectPipeline> {
        self.pipelines.get(subject_id)
    }

    pub fn audit(&self) -> &SharedAuditLog {
        &self.audit
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
