//! Delivery of alerts and risk updates to external collaborators.
//!
//! Confirmed alerts go to an [`AlertSink`] exactly once; cancelled and
//! suppressed records are handed over for archival. Risk assessments are
//! pushed to a [`RiskSink`] as they are produced.

use crate::core::alerts::Alert;
use crate::core::risk::RiskAssessment;
use crate::source::types::SubjectId;
use crossbeam_channel::Sender;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Errors raised by a single sink call.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("receiver disconnected")]
    Disconnected,
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Errors surfaced to the pipeline after retries.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery of alert {alert_id} failed after {attempts} attempts: {last}")]
    Exhausted {
        alert_id: Uuid,
        attempts: u32,
        #[source]
        last: SinkError,
    },
}

/// Receiver of alert records.
pub trait AlertSink: Send + Sync {
    /// Sink name, for logs.
    fn name(&self) -> &str;

    /// Deliver a confirmed alert to caregivers.
    fn deliver(&self, alert: &Alert) -> Result<(), SinkError>;

    /// Archive a cancelled or suppressed record.
    fn archive(&self, _alert: &Alert) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Receiver of risk assessments.
pub trait RiskSink: Send + Sync {
    fn notify(&self, subject_id: &SubjectId, assessment: &RiskAssessment);
}

/// Deliver `alert`, retrying up to `attempts` times in total.
pub fn deliver_with_retry(
    sink: &dyn AlertSink,
    alert: &Alert,
    attempts: u32,
) -> Result<(), DeliveryError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match sink.deliver(alert) {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= attempts => {
                return Err(DeliveryError::Exhausted {
                    alert_id: alert.id,
                    attempts,
                    last: e,
                });
            }
            Err(e) => {
                warn!(sink = sink.name(), alert = %alert.id, attempt, "delivery failed: {e}");
                attempt += 1;
            }
        }
    }
}

/// Logs every alert and assessment through `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl AlertSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn deliver(&self, alert: &Alert) -> Result<(), SinkError> {
        warn!(
            subject = %alert.subject_id,
            alert = %alert.id,
            kind = %alert.kind,
            severity = %alert.severity,
            "ALERT"
        );
        Ok(())
    }

    fn archive(&self, alert: &Alert) -> Result<(), SinkError> {
        info!(subject = %alert.subject_id, alert = %alert.id, state = ?alert.state, "alert archived");
        Ok(())
    }
}

impl RiskSink for TracingSink {
    fn notify(&self, subject_id: &SubjectId, assessment: &RiskAssessment) {
        tracing::trace!(subject = %subject_id, level = %assessment.level, score = assessment.score, "risk update");
    }
}

/// Collects everything in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    delivered: Mutex<Vec<Alert>>,
    archived: Mutex<Vec<Alert>>,
    assessments: Mutex<Vec<(SubjectId, RiskAssessment)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Alert> {
        self.delivered.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn archived(&self) -> Vec<Alert> {
        self.archived.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn assessments(&self) -> Vec<(SubjectId, RiskAssessment)> {
        self.assessments.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl AlertSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn deliver(&self, alert: &Alert) -> Result<(), SinkError> {
        self.delivered
            .lock()
            .map_err(|e| SinkError::Rejected(e.to_string()))?
            .push(alert.clone());
        Ok(())
    }

    fn archive(&self, alert: &Alert) -> Result<(), SinkError> {
        self.archived
            .lock()
            .map_err(|e| SinkError::Rejected(e.to_string()))?
            .push(alert.clone());
        Ok(())
    }
}

impl RiskSink for MemorySink {
    fn notify(&self, subject_id: &SubjectId, assessment: &RiskAssessment) {
        if let Ok(mut assessments) = self.assessments.lock() {
            assessments.push((subject_id.clone(), assessment.clone()));
        }
    }
}

/// Appends every record as one JSON line.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlSink {
    /// Open (or create) the archive at `path` for appending.
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, alert: &Alert) -> Result<(), SinkError> {
        let line = serde_json::to_string(alert)?;
        let mut file = self
            .file
            .lock()
            .map_err(|e| SinkError::Rejected(e.to_string()))?;
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }
}

impl AlertSink for JsonlSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn deliver(&self, alert: &Alert) -> Result<(), SinkError> {
        self.append(alert)
    }

    fn archive(&self, alert: &Alert) -> Result<(), SinkError> {
        self.append(alert)
    }
}

/// Forwards confirmed alerts to another thread.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<Alert>,
}

impl ChannelSink {
    pub fn new(sender: Sender<Alert>) -> Self {
        Self { sender }
    }
}

impl AlertSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    fn deliver(&self, alert: &Alert) -> Result<(), SinkError> {
        self.sender
            .send(alert.clone())
            .map_err(|_| SinkError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::alerts::AlertState;
    use crate::core::engine::DetectionKind;
    use crate::core::risk::RiskLevel;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn alert() -> Alert {
        let now = Utc::now();
        Alert {
            id: Uuid::new_v4(),
            subject_id: SubjectId::from("bed-1"),
            kind: DetectionKind::FallConfirmed,
            severity: RiskLevel::High,
            risk_score: 0.7,
            created_at: now,
            expires_at: now,
            resolved_at: Some(now),
            state: AlertState::Confirmed,
            suppression: None,
            event_count: 1,
        }
    }

    /// Fails the first `failures` deliveries.
    struct FlakySink {
        failures: u32,
        calls: AtomicU32,
    }

    impl AlertSink for FlakySink {
        fn name(&self) -> &str {
            "flaky"
        }

        fn deliver(&self, _alert: &Alert) -> Result<(), SinkError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(SinkError::Rejected("pager offline".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_retry_recovers() {
        let sink = FlakySink {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        deliver_with_retry(&sink, &alert(), 3).unwrap();
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_exhausted() {
        let sink = FlakySink {
            failures: 5,
            calls: AtomicU32::new(0),
        };
        let err = deliver_with_retry(&sink, &alert(), 3).unwrap_err();
        let DeliveryError::Exhausted { attempts, .. } = err;
        assert_eq!(attempts, 3);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_jsonl_sink_appends_lines() {
        let path = std::env::temp_dir().join(format!("fall-guard-alerts-{}.jsonl", Uuid::new_v4()));
        let sink = JsonlSink::open(&path).unwrap();
        sink.deliver(&alert()).unwrap();
        sink.archive(&alert()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("\"type\":\"fall_confirmed\""));
    }

    #[test]
    fn test_channel_sink_disconnected() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let sink = ChannelSink::new(tx);
        sink.deliver(&alert()).unwrap();
        assert!(rx.try_recv().is_ok());

        drop(rx);
        assert!(matches!(sink.deliver(&alert()), Err(SinkError::Disconnected)));
    }
}
