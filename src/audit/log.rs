//! Processing audit log.
//!
//! Counts samples, detections and alert outcomes across every subject of
//! a session. Counters are atomic so worker threads can share one log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Audit counters for the current session.
#[derive(Debug)]
pub struct AuditLog {
    /// Samples accepted into a window
    samples_ingested: AtomicU64,
    /// Samples dropped as out-of-order or non-finite
    samples_rejected: AtomicU64,
    /// Windows cleared because of a sample gap
    gap_resets: AtomicU64,
    /// Feature vectors emitted
    vectors_emitted: AtomicU64,
    /// Detection events raised by the engine
    events_detected: AtomicU64,
    alerts_created: AtomicU64,
    alerts_suppressed: AtomicU64,
    alerts_cancelled: AtomicU64,
    alerts_confirmed: AtomicU64,
    alerts_delivered: AtomicU64,
    /// Deliveries that exhausted their retries
    delivery_failures: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl AuditLog {
    /// Create a new audit log.
    pub fn new() -> Self {
        Self {
            samples_ingested: AtomicU64::new(0),
            samples_rejected: AtomicU64::new(0),
            gap_resets: AtomicU64::new(0),
            vectors_emitted: AtomicU64::new(0),
            events_detected: AtomicU64::new(0),
            alerts_created: AtomicU64::new(0),
            alerts_suppressed: AtomicU64::new(0),
            alerts_cancelled: AtomicU64::new(0),
            alerts_confirmed: AtomicU64::new(0),
            alerts_delivered: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create an audit log that accumulates into a file.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!("could not load previous audit stats: {e}");
        }

        log
    }

    pub fn record_sample(&self) {
        self.samples_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_sample(&self) {
        self.samples_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gap_reset(&self) {
        self.gap_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_vector(&self) {
        self.vectors_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event(&self) {
        self.events_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert_created(&self) {
        self.alerts_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert_suppressed(&self) {
        self.alerts_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert_cancelled(&self) {
        self.alerts_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record alerts confirmed by one tick.
    pub fn record_alerts_confirmed(&self, count: u64) {
        self.alerts_confirmed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_alert_delivered(&self) {
        self.alerts_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> AuditStats {
        AuditStats {
            samples_ingested: self.samples_ingested.load(Ordering::Relaxed),
            samples_rejected: self.samples_rejected.load(Ordering::Relaxed),
            gap_resets: self.gap_resets.load(Ordering::Relaxed),
            vectors_emitted: self.vectors_emitted.load(Ordering::Relaxed),
            events_detected: self.events_detected.load(Ordering::Relaxed),
            alerts_created: self.alerts_created.load(Ordering::Relaxed),
            alerts_suppressed: self.alerts_suppressed.load(Ordering::Relaxed),
            alerts_cancelled: self.alerts_cancelled.load(Ordering::Relaxed),
            alerts_confirmed: self.alerts_confirmed.load(Ordering::Relaxed),
            alerts_delivered: self.alerts_delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Samples ingested: {}\n\
             - Samples rejected: {}\n\
             - Window gap resets: {}\n\
             - Feature vectors: {}\n\
             - Detection events: {}\n\
             \n\
             Alerts:\n\
             - Created: {}\n\
             - Suppressed: {}\n\
             - Cancelled by wearer: {}\n\
             - Confirmed: {}\n\
             - Delivered: {}\n\
             - Delivery failures: {}\n\
             - Session duration: {} seconds",
            stats.samples_ingested,
            stats.samples_rejected,
            stats.gap_resets,
            stats.vectors_emitted,
            stats.events_detected,
            stats.alerts_created,
            stats.alerts_suppressed,
            stats.alerts_cancelled,
            stats.alerts_confirmed,
            stats.alerts_delivered,
            stats.delivery_failures,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                samples_ingested: stats.samples_ingested,
                samples_rejected: stats.samples_rejected,
                events_detected: stats.events_detected,
                alerts_created: stats.alerts_created,
                alerts_suppressed: stats.alerts_suppressed,
                alerts_confirmed: stats.alerts_confirmed,
                alerts_delivered: stats.alerts_delivered,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.samples_ingested
                    .store(persisted.samples_ingested, Ordering::Relaxed);
                self.samples_rejected
                    .store(persisted.samples_rejected, Ordering::Relaxed);
                self.events_detected
                    .store(persisted.events_detected, Ordering::Relaxed);
                self.alerts_created
                    .store(persisted.alerts_created, Ordering::Relaxed);
                self.alerts_suppressed
                    .store(persisted.alerts_suppressed, Ordering::Relaxed);
                self.alerts_confirmed
                    .store(persisted.alerts_confirmed, Ordering::Relaxed);
                self.alerts_delivered
                    .store(persisted.alerts_delivered, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in [
            &self.samples_ingested,
            &self.samples_rejected,
            &self.gap_resets,
            &self.vectors_emitted,
            &self.events_detected,
            &self.alerts_created,
            &self.alerts_suppressed,
            &self.alerts_cancelled,
            &self.alerts_confirmed,
            &self.alerts_delivered,
            &self.delivery_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of audit statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStats {
    pub samples_ingested: u64,
    pub samples_rejected: u64,
    pub gap_resets: u64,
    pub vectors_emitted: u64,
    pub events_detected: u64,
    pub alerts_created: u64,
    pub alerts_suppressed: u64,
    pub alerts_cancelled: u64,
    pub alerts_confirmed: u64,
    pub alerts_delivered: u64,
    pub delivery_failures: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    samples_ingested: u64,
    samples_rejected: u64,
    events_detected: u64,
    alerts_created: u64,
    alerts_suppressed: u64,
    alerts_confirmed: u64,
    alerts_delivered: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared audit log.
pub type SharedAuditLog = Arc<AuditLog>;

/// Create a new shared audit log.
pub fn create_shared_log() -> SharedAuditLog {
    Arc::new(AuditLog::new())
}

/// Create a new shared audit log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedAuditLog {
    Arc::new(AuditLog::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_log_counting() {
        let log = AuditLog::new();

        log.record_sample();
        log.record_sample();
        log.record_rejected_sample();
        log.record_alerts_confirmed(2);

        let stats = log.stats();
        assert_eq!(stats.samples_ingested, 2);
        assert_eq!(stats.samples_rejected, 1);
        assert_eq!(stats.alerts_confirmed, 2);
    }

    #[test]
    fn test_audit_log_reset() {
        let log = AuditLog::new();

        log.record_event();
        log.record_delivery_failure();
        log.reset();

        let stats = log.stats();
        assert_eq!(stats.events_detected, 0);
        assert_eq!(stats.delivery_failures, 0);
    }

    #[test]
    fn test_persisted_counts_survive_reload() {
        let path = std::env::temp_dir().join(format!("fall-guard-audit-{}.json", uuid::Uuid::new_v4()));
        let log = AuditLog::with_persistence(path.clone());
        log.record_sample();
        log.record_alert_created();
        log.save().unwrap();

        let reloaded = AuditLog::with_persistence(path.clone());
        let _ = std::fs::remove_file(&path);
        assert_eq!(reloaded.stats().samples_ingested, 1);
        assert_eq!(reloaded.stats().alerts_created, 1);
    }

    #[test]
    fn test_summary_format() {
        let summary = AuditLog::new().summary();
        assert!(summary.contains("Samples ingested"));
        assert!(summary.contains("Delivery failures"));
    }
}
