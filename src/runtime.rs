//! Threaded runtime.
//!
//! Each subject gets a worker thread that owns its pipeline outright and is
//! driven through a bounded command channel. Workers share only the sinks
//! and the audit log; replies travel back over one-shot channels.

use crate::audit::{create_shared_log, SharedAuditLog};
use crate::config::{Config, ConfigError};
use crate::core::alerts::CancelError;
use crate::core::risk::RiskScorer;
use crate::core::snapshot::{SnapshotBuilder, SubjectSnapshot};
use crate::delivery::{AlertSink, RiskSink};
use crate::pipeline::SubjectPipeline;
use crate::source::types::{SensorSample, SubjectId};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Sender};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Capacity of each worker's command queue.
const COMMAND_QUEUE: usize = 1024;

/// Requests handled by a subject worker.
#[derive(Debug)]
pub enum Command {
    Sample(SensorSample),
    Tick(DateTime<Utc>),
    Cancel {
        alert_id: Uuid,
        requested_at: DateTime<Utc>,
        reply: Sender<Result<(), CancelError>>,
    },
    Snapshot(Sender<SubjectSnapshot>),
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("unknown subject: {0}")]
    UnknownSubject(SubjectId),
    #[error("subject already running: {0}")]
    AlreadyRunning(SubjectId),
    #[error("worker for subject {0} has stopped")]
    WorkerGone(SubjectId),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cancel(#[from] CancelError),
}

/// Handle to one subject's worker thread.
pub struct SubjectWorker {
    subject_id: SubjectId,
    commands: Sender<Command>,
    handle: Option<JoinHandle<SubjectPipeline>>,
}

impl SubjectWorker {
    /// Move `pipeline` onto a new thread.
    pub fn spawn(pipeline: SubjectPipeline) -> Self {
        let subject_id = pipeline.subject_id().clone();
        let (commands, inbox) = bounded::<Command>(COMMAND_QUEUE);

        let handle = thread::spawn(move || {
            let mut pipeline = pipeline;
            for command in inbox.iter() {
                match command {
                    Command::Sample(sample) => {
                        if let Err(e) = pipeline.feed(sample) {
                            warn!(subject = %pipeline.subject_id(), "sample dropped: {e}");
                        }
                    }
                    Command::Tick(now) => {
                        if let Err(e) = pipeline.tick(now) {
                            error!(subject = %pipeline.subject_id(), "{e}");
                        }
                    }
                    Command::Cancel {
                        alert_id,
                        requested_at,
                        reply,
                    } => {
                        let subject_id = pipeline.subject_id().clone();
                        let result = pipeline.cancel(alert_id, &subject_id, requested_at);
                        let _ = reply.send(result);
                    }
                    Command::Snapshot(reply) => {
                        let _ = reply.send(pipeline.snapshot());
                    }
                    Command::Shutdown => break,
                }
            }
            debug!(subject = %pipeline.subject_id(), "worker stopped");
            pipeline
        });

        Self {
            subject_id,
            commands,
            handle: Some(handle),
        }
    }

    pub fn subject_id(&self) -> &SubjectId {
        &self.subject_id
    }

    /// Queue a command, blocking while the queue is full.
    pub fn send(&self, command: Command) -> Result<(), RuntimeError> {
        self.commands
            .send(command)
            .map_err(|_| RuntimeError::WorkerGone(self.subject_id.clone()))
    }

    pub fn cancel(&self, alert_id: Uuid, requested_at: DateTime<Utc>) -> Result<(), RuntimeError> {
        let (reply, response) = bounded(1);
        self.send(Command::Cancel {
            alert_id,
            requested_at,
            reply,
        })?;
        let result = response
            .recv()
            .map_err(|_| RuntimeError::WorkerGone(self.subject_id.clone()))?;
        Ok(result?)
    }

    pub fn snapshot(&self) -> Result<SubjectSnapshot, RuntimeError> {
        let (reply, response) = bounded(1);
        self.send(Command::Snapshot(reply))?;
        response
            .recv()
            .map_err(|_| RuntimeError::WorkerGone(self.subject_id.clone()))
    }

    /// Drain queued commands, stop the thread and hand back its pipeline.
    pub fn shutdown(mut self) -> Result<SubjectPipeline, RuntimeError> {
        let _ = self.commands.send(Command::Shutdown);
        self.join()
    }

    fn join(&mut self) -> Result<SubjectPipeline, RuntimeError> {
        self.handle
            .take()
            .ok_or_else(|| RuntimeError::WorkerGone(self.subject_id.clone()))?
            .join()
            .map_err(|_| RuntimeError::WorkerGone(self.subject_id.clone()))
    }
}

impl Drop for SubjectWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.commands.send(Command::Shutdown);
            let _ = self.join();
        }
    }
}

/// Worker threads for every running subject.
pub struct Runtime {
    config: Config,
    workers: BTreeMap<SubjectId, SubjectWorker>,
    alert_sink: Arc<dyn AlertSink>,
    risk_sink: Option<Arc<dyn RiskSink>>,
    scorer: Option<Arc<dyn RiskScorer>>,
    audit: SharedAuditLog,
    snapshots: Arc<SnapshotBuilder>,
}

impl Runtime {
    pub fn new(config: Config, alert_sink: Arc<dyn AlertSink>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            workers: BTreeMap::new(),
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

    pub fn with_scorer(mut self, scorer: Arc<dyn RiskScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Build a pipeline for `subject_id` and start its worker.
    pub fn start(&mut self, subject_id: SubjectId) -> Result<(), RuntimeError> {
        if self.workers.contains_key(&subject_id) {
            return Err(RuntimeError::AlreadyRunning(subject_id));
        }
        let mut pipeline =
            SubjectPipeline::from_config(&self.config, subject_id.clone(), Arc::clone(&self.alert_sink))?
                .with_audit(Arc::clone(&self.audit))
                .with_snapshot_builder(Arc::clone(&self.snapshots));
        if let Some(sink) = &self.risk_sink {
            pipeline = pipeline.with_risk_sink(Arc::clone(sink));
        }
        if let Some(scorer) = &self.scorer {
            pipeline = pipeline.with_scorer(Arc::clone(scorer));
        }
        info!(subject = %subject_id, "worker started");
        self.workers
            .insert(subject_id, SubjectWorker::spawn(pipeline));
        Ok(())
    }

    /// Route a sample to its subject's worker.
    pub fn dispatch(&self, subject_id: &SubjectId, sample: SensorSample) -> Result<(), RuntimeError> {
        self.worker(subject_id)?.send(Command::Sample(sample))
    }

    pub fn tick_all(&self, now: DateTime<Utc>) {
        for worker in self.workers.values() {
            if let Err(e) = worker.send(Command::Tick(now)) {
                error!("{e}");
            }
        }
    }

    pub fn cancel(
        &self,
        subject_id: &SubjectId,
        alert_id: Uuid,
        requested_at: DateTime<Utc>,
    ) -> Result<(), RuntimeError> {
        self.worker(subject_id)?.cancel(alert_id, requested_at)
    }

    /// Snapshots of every subject whose worker is still alive.
    pub fn snapshots(&self) -> Vec<SubjectSnapshot> {
        self.workers
            .values()
            .filter_map(|worker| match worker.snapshot() {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!("{e}");
                    None
                }
            })
            .collect()
    }

    pub fn subjects(&self) -> impl Iterator<Item = &SubjectId> {
        self.workers.keys()
    }

    pub fn audit(&self) -> &SharedAuditLog {
        &self.audit
    }

    /// Stop every worker and return the final pipelines.
    pub fn shutdown(self) -> Vec<SubjectPipeline> {
        let mut pipelines = Vec::new();
        for (subject_id, worker) in self.workers {
            match worker.shutdown() {
                Ok(pipeline) => pipelines.push(pipeline),
                Err(e) => error!(subject = %subject_id, "{e}"),
            }
        }
        pipelines
    }

    fn worker(&self, subject_id: &SubjectId) -> Result<&SubjectWorker, RuntimeError> {
        self.workers
            .get(subject_id)
            .ok_or_else(|| RuntimeError::UnknownSubject(subject_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::alerts::AlertState;
    use crate::core::engine::EngineState;
    use crate::delivery::MemorySink;
    use crate::source::simulated::Scenario;
    use chrono::TimeZone;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_worker_processes_fall_in_order() {
        let sink = Arc::new(MemorySink::new());
        let mut runtime = Runtime::new(Config::default(), sink.clone()).unwrap();
        let subject = SubjectId::from("room-4");
        runtime.start(subject.clone()).unwrap();

        for sample in Scenario::Fall.builder().build(50.0, noon()) {
            runtime.dispatch(&subject, sample).unwrap();
        }
        runtime.tick_all(noon() + chrono::Duration::seconds(60));

        let snapshots = runtime.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].state, EngineState::PostFallMonitoring);

        let pipelines = runtime.shutdown();
        assert_eq!(pipelines.len(), 1);
        assert_eq!(sink.delivered().len(), 1);
    }

    #[test]
    fn test_cancel_through_worker() {
        let sink = Arc::new(MemorySink::new());
        let mut runtime = Runtime::new(Config::default(), sink.clone()).unwrap();
        let subject = SubjectId::from("room-5");
        runtime.start(subject.clone()).unwrap();

        let samples = Scenario::Fall.builder().build(50.0, noon());
        let mut last = noon();
        for sample in samples {
            last = sample.timestamp;
            runtime.dispatch(&subject, sample).unwrap();
            // Stop as soon as an alert is pending.
            if runtime.snapshots()[0].pending_alert.is_some() {
                break;
            }
        }
        let pending = runtime.snapshots()[0]
            .pending_alert
            .clone()
            .expect("fall should leave a pending alert");

        runtime.cancel(&subject, pending.id, last).unwrap();
        let again = runtime.cancel(&subject, pending.id, last);
        assert!(matches!(
            again,
            Err(RuntimeError::Cancel(CancelError::AlreadyResolved(_)))
        ));

        let pipelines = runtime.shutdown();
        let record = pipelines[0].alerts().find(pending.id).unwrap();
        assert_eq!(record.state, AlertState::Cancelled);
        assert!(sink.delivered().is_empty());
    }

    #[test]
    fn test_unknown_subject() {
        let runtime = Runtime::new(Config::default(), Arc::new(MemorySink::new())).unwrap();
        let sample = Scenario::Standing.builder().build(50.0, noon())[0];
        assert!(matches!(
            runtime.dispatch(&SubjectId::from("nobody"), sample),
            Err(RuntimeError::UnknownSubject(_))
        ));
    }
}
