//! Alert lifecycle for one subject.
//!
//! Every detection event passes the policy chain in order:
//!
//! 1. sleep window (non-critical events are suppressed),
//! 2. sit-down filter (events below High right after sitting down),
//! 3. rate limit (no repeat of equal or lower severity within the interval),
//! 4. create a Pending alert, or merge into the one already pending.
//!
//! A Pending alert becomes Confirmed once its cancellation window elapses
//! (checked by [`AlertController::tick`], never by blocking) and is queued in
//! the outbox for delivery. Cancelled and Suppressed records are queued for
//! archival instead.

use crate::config::{AlertPolicy, ConfigError};
use crate::core::engine::{DetectionEvent, DetectionKind};
use crate::core::risk::RiskLevel;
use crate::source::types::SubjectId;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Ids of resolved alerts remembered after they leave the history.
const RESOLVED_ID_LIMIT: usize = 1024;

/// Alert lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Pending,
    Confirmed,
    Cancelled,
    Suppressed,
    /// Confirmed and acknowledged by a caregiver
    Acknowledged,
}

impl AlertState {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, AlertState::Pending)
    }
}

/// Why an event did not produce a Pending alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    SleepWindow,
    SitTransition,
    RateLimited,
}

/// An alert record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub subject_id: SubjectId,
    #[serde(rename = "type")]
    pub kind: DetectionKind,
    pub severity: RiskLevel,
    pub risk_score: f64,
    pub created_at: DateTime<Utc>,
    /// End of the cancellation window
    pub expires_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub state: AlertState,
    pub suppression: Option<SuppressionReason>,
    /// Events folded into this alert, including the first
    pub event_count: u32,
}

impl Alert {
    fn from_event(event: &DetectionEvent, window: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id: event.subject_id.clone(),
            kind: event.kind,
            severity: event.severity(),
            risk_score: event.risk.score,
            created_at: event.timestamp,
            expires_at: event.timestamp + window,
            resolved_at: None,
            state: AlertState::Pending,
            suppression: None,
            event_count: 1,
        }
    }

    fn merge(&mut self, event: &DetectionEvent) {
        self.severity = self.severity.max(event.severity());
        self.risk_score = self.risk_score.max(event.risk.score);
        if event.kind.priority() > self.kind.priority() {
            self.kind = event.kind;
        }
        self.event_count += 1;
    }
}

/// Per-reason suppression counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionStats {
    pub sleep_window: u64,
    pub sit_transition: u64,
    pub rate_limited: u64,
}

impl SuppressionStats {
    fn record(&mut self, reason: SuppressionReason) {
        match reason {
            SuppressionReason::SleepWindow => self.sleep_window += 1,
            SuppressionReason::SitTransition => self.sit_transition += 1,
            SuppressionReason::RateLimited => self.rate_limited += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.sleep_window + self.sit_transition + self.rate_limited
    }
}

/// Errors from [`AlertController::cancel`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CancelError {
    #[error("alert {0} not found")]
    NotFound(Uuid),
    #[error("alert {0} is already resolved")]
    AlreadyResolved(Uuid),
}

/// Errors from [`AlertController::acknowledge`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcknowledgeError {
    #[error("alert {0} not found")]
    NotFound(Uuid),
    #[error("alert {0} is not confirmed")]
    NotConfirmed(Uuid),
}

/// Anchor for rate limiting: the most recent alert record.
#[derive(Debug, Clone, Copy)]
struct LastAlert {
    created_at: DateTime<Utc>,
    severity: RiskLevel,
}

/// Alert controller owned by one subject's pipeline.
#[derive(Debug)]
pub struct AlertController {
    subject_id: SubjectId,
    policy: AlertPolicy,
    tz: Tz,
    pending: Option<Alert>,
    history: VecDeque<Alert>,
    /// Ids evicted from `history`, oldest first
    evicted_ids: VecDeque<Uuid>,
    outbox: VecDeque<Alert>,
    archive: VecDeque<Alert>,
    last_alert: Option<LastAlert>,
    last_event_at: Option<DateTime<Utc>>,
    stats: SuppressionStats,
}

impl AlertController {
    pub fn new(subject_id: SubjectId, policy: AlertPolicy) -> Result<Self, ConfigError> {
        policy.validate()?;
        let tz = policy.tz()?;
        Ok(Self {
            subject_id,
            policy,
            tz,
            pending: None,
            history: VecDeque::new(),
            evicted_ids: VecDeque::new(),
            outbox: VecDeque::new(),
            archive: VecDeque::new(),
            last_alert: None,
            last_event_at: None,
            stats: SuppressionStats::default(),
        })
    }

    /// Apply the policy chain to a detection event.
    ///
    /// Returns the new record for a created or suppressed alert, and `None`
    /// when the event was merged into the pending alert or rejected.
    pub fn on_event(&mut self, event: &DetectionEvent) -> Option<Alert> {
        if event.subject_id != self.subject_id {
            warn!(subject = %self.subject_id, other = %event.subject_id, "event for another subject ignored");
            return None;
        }
        if let Some(last) = self.last_event_at {
            if event.timestamp < last {
                warn!(subject = %self.subject_id, timestamp = %event.timestamp, %last, "out-of-order event dropped");
                return None;
            }
        }
        self.last_event_at = Some(event.timestamp);
        self.expire(event.timestamp);

        if let Some(reason) = self.suppression_reason(event) {
            let mut alert = Alert::from_event(event, self.window());
            alert.state = AlertState::Suppressed;
            alert.suppression = Some(reason);
            alert.resolved_at = Some(event.timestamp);

            self.stats.record(reason);
            self.last_alert = Some(LastAlert {
                created_at: alert.created_at,
                severity: alert.severity,
            });
            self.remember(alert.clone());
            self.archive.push_back(alert.clone());
            info!(subject = %self.subject_id, alert = %alert.id, kind = %alert.kind, ?reason, "alert suppressed");
            return Some(alert);
        }

        if let Some(pending) = self.pending.as_mut() {
            pending.merge(event);
            self.last_alert = Some(LastAlert {
                created_at: event.timestamp,
                severity: pending.severity,
            });
            debug!(subject = %self.subject_id, alert = %pending.id, severity = %pending.severity, "event merged into pending alert");
            return None;
        }

        let alert = Alert::from_event(event, self.window());
        self.last_alert = Some(LastAlert {
            created_at: alert.created_at,
            severity: alert.severity,
        });
        self.pending = Some(alert.clone());
        info!(
            subject = %self.subject_id,
            alert = %alert.id,
            kind = %alert.kind,
            severity = %alert.severity,
            expires_at = %alert.expires_at,
            "alert pending"
        );
        Some(alert)
    }

    /// Confirm a pending alert whose cancellation window has elapsed.
    /// Returns the alerts confirmed by this call; repeated calls for the same
    /// `now` confirm nothing further.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Alert> {
        self.expire(now).into_iter().collect()
    }

    /// Cancel a pending alert within its window.
    ///
    /// Resolved alerts report `AlreadyResolved` while their id is still
    /// remembered: the last `history_limit` records in full, plus up to
    /// 1024 older ids. Anything older reports `NotFound`.
    pub fn cancel(
        &mut self,
        alert_id: Uuid,
        subject_id: &SubjectId,
        requested_at: DateTime<Utc>,
    ) -> Result<(), CancelError> {
        if *subject_id != self.subject_id {
            return Err(CancelError::NotFound(alert_id));
        }
        // A request that arrives after the window loses the race.
        self.expire(requested_at);

        match self.pending.take() {
            Some(mut alert) if alert.id == alert_id => {
                alert.state = AlertState::Cancelled;
                alert.resolved_at = Some(requested_at);
                info!(subject = %self.subject_id, alert = %alert.id, "alert cancelled");
                self.remember(alert.clone());
                self.archive.push_back(alert);
                Ok(())
            }
            other => {
                self.pending = other;
                if self.is_resolved(alert_id) {
                    Err(CancelError::AlreadyResolved(alert_id))
                } else {
                    Err(CancelError::NotFound(alert_id))
                }
            }
        }
    }

    /// Mark a confirmed alert as acknowledged.
    pub fn acknowledge(&mut self, alert_id: Uuid, at: DateTime<Utc>) -> Result<(), AcknowledgeError> {
        if self.pending.as_ref().is_some_and(|a| a.id == alert_id) {
            return Err(AcknowledgeError::NotConfirmed(alert_id));
        }
        let alert = self
            .history
            .iter_mut()
            .find(|a| a.id == alert_id)
            .ok_or(AcknowledgeError::NotFound(alert_id))?;
        if alert.state != AlertState::Confirmed {
            return Err(AcknowledgeError::NotConfirmed(alert_id));
        }
        alert.state = AlertState::Acknowledged;
        info!(subject = %self.subject_id, alert = %alert_id, %at, "alert acknowledged");
        Ok(())
    }

    /// Oldest confirmed alert awaiting delivery.
    pub fn next_delivery(&self) -> Option<&Alert> {
        self.outbox.front()
    }

    /// Drop the head of the outbox after a successful delivery.
    pub fn complete_delivery(&mut self, alert_id: Uuid) -> Option<Alert> {
        if self.outbox.front().is_some_and(|a| a.id == alert_id) {
            self.outbox.pop_front()
        } else {
            None
        }
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    /// Drain cancelled and suppressed records awaiting archival.
    pub fn take_archived(&mut self) -> Vec<Alert> {
        self.archive.drain(..).collect()
    }

    /// Put records whose archival failed back at the head of the queue,
    /// keeping their order.
    pub fn requeue_archived(&mut self, records: impl IntoIterator<Item = Alert>) {
        let mut queue: VecDeque<Alert> = records.into_iter().collect();
        queue.append(&mut self.archive);
        self.archive = queue;
    }

    pub fn archive_len(&self) -> usize {
        self.archive.len()
    }

    pub fn pending(&self) -> Option<&Alert> {
        self.pending.as_ref()
    }

    /// Look up an alert by id among the pending alert and recent history.
    pub fn find(&self, alert_id: Uuid) -> Option<&Alert> {
        self.pending
            .iter()
            .chain(self.history.iter())
            .find(|a| a.id == alert_id)
    }

    /// Resolved alerts, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Alert> {
        self.history.iter()
    }

    pub fn stats(&self) -> SuppressionStats {
        self.stats
    }

    pub fn subject_id(&self) -> &SubjectId {
        &self.subject_id
    }

    fn window(&self) -> Duration {
        Duration::from_std(self.policy.cancellation_window).unwrap_or_else(|_| Duration::seconds(10))
    }

    fn expire(&mut self, now: DateTime<Utc>) -> Option<Alert> {
        let expired = self.pending.as_ref().is_some_and(|a| a.expires_at <= now);
        if !expired {
            return None;
        }
        let mut alert = self.pending.take()?;
        alert.state = AlertState::Confirmed;
        alert.resolved_at = Some(alert.expires_at);
        info!(subject = %self.subject_id, alert = %alert.id, kind = %alert.kind, severity = %alert.severity, "alert confirmed");
        self.remember(alert.clone());
        self.outbox.push_back(alert.clone());
        Some(alert)
    }

    fn suppression_reason(&self, event: &DetectionEvent) -> Option<SuppressionReason> {
        let severity = event.severity();

        if self.policy.sleep_suppression && severity < RiskLevel::Critical {
            if let Some(window) = self.policy.sleep_window {
                let local = event.timestamp.with_timezone(&self.tz).time();
                if window.contains(local) {
                    return Some(SuppressionReason::SleepWindow);
                }
            }
        }

        if self.policy.sitting_filter && severity < RiskLevel::High {
            if let Some(sat_at) = event.last_sit_down_at {
                let since = event.timestamp - sat_at;
                if since >= Duration::zero()
                    && since.to_std().is_ok_and(|d| d <= self.policy.sit_transition_window)
                {
                    return Some(SuppressionReason::SitTransition);
                }
            }
        }

        if let Some(last) = self.last_alert {
            let within = (event.timestamp - last.created_at)
                .to_std()
                .is_ok_and(|d| d < self.policy.min_alert_interval);
            if within && severity <= last.severity {
                return Some(SuppressionReason::RateLimited);
            }
        }

        None
    }

    fn is_resolved(&self, alert_id: Uuid) -> bool {
        self.history.iter().any(|a| a.id == alert_id) || self.evicted_ids.contains(&alert_id)
    }

    fn remember(&mut self, alert: Alert) {
        self.history.push_back(alert);
        while self.history.len() > self.policy.history_limit {
            if let Some(evicted) = self.history.pop_front() {
                self.evicted_ids.push_back(evicted.id);
            }
        }
        while self.evicted_ids.len() > RESOLVED_ID_LIMIT {
            self.evicted_ids.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::FeatureVector;
    use crate::core::risk::RiskAssessment;
    use chrono::TimeZone;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn subject() -> SubjectId {
        SubjectId::from("room-12")
    }

    fn event(at: DateTime<Utc>, kind: DetectionKind, level: RiskLevel) -> DetectionEvent {
        let score = match level {
            RiskLevel::Low => 0.1,
            RiskLevel::Medium => 0.4,
            RiskLevel::High => 0.65,
            RiskLevel::Critical => 0.9,
        };
        DetectionEvent {
            subject_id: subject(),
            timestamp: at,
            kind,
            risk: RiskAssessment {
                level,
                score,
                contributing_features: Vec::new(),
                timestamp: at,
            },
            trigger: FeatureVector {
                timestamp: at,
                ..Default::default()
            },
            last_sit_down_at: None,
        }
    }

    fn fall(at: DateTime<Utc>, level: RiskLevel) -> DetectionEvent {
        event(at, DetectionKind::FallConfirmed, level)
    }

    fn controller() -> AlertController {
        AlertController::new(subject(), AlertPolicy::default()).unwrap()
    }

    #[test]
    fn test_pending_alert_confirms_after_window() {
        let mut ctl = controller();
        let alert = ctl.on_event(&fall(noon(), RiskLevel::High)).unwrap();
        assert_eq!(alert.state, AlertState::Pending);

        assert!(ctl.tick(noon() + Duration::seconds(9)).is_empty());
        let confirmed = ctl.tick(noon() + Duration::seconds(10));
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].id, alert.id);
        assert_eq!(confirmed[0].state, AlertState::Confirmed);

        // Idempotent for the same instant.
        assert!(ctl.tick(noon() + Duration::seconds(10)).is_empty());
        assert_eq!(ctl.outbox_len(), 1);
        assert!(ctl.pending().is_none());
    }

    #[test]
    fn test_sleep_window_suppresses_non_critical() {
        let mut ctl = controller();
        let night = Utc.with_ymd_and_hms(2026, 3, 2, 23, 30, 0).unwrap();

        let alert = ctl.on_event(&fall(night, RiskLevel::High)).unwrap();
        assert_eq!(alert.state, AlertState::Suppressed);
        assert_eq!(alert.suppression, Some(SuppressionReason::SleepWindow));
        assert!(ctl.tick(night + Duration::minutes(5)).is_empty());
        assert_eq!(ctl.stats().sleep_window, 1);
        assert_eq!(ctl.take_archived().len(), 1);

        let critical = ctl
            .on_event(&fall(night + Duration::minutes(1), RiskLevel::Critical))
            .unwrap();
        assert_eq!(critical.state, AlertState::Pending);
    }

    #[test]
    fn test_sleep_window_uses_subject_timezone() {
        let mut policy = AlertPolicy::default();
        policy.timezone = "America/New_York".to_string();
        let mut ctl = AlertController::new(subject(), policy).unwrap();

        // 03:30 UTC is 22:30 the previous evening in New York (EST).
        let at = Utc.with_ymd_and_hms(2026, 1, 15, 3, 30, 0).unwrap();
        let alert = ctl.on_event(&fall(at, RiskLevel::High)).unwrap();
        assert_eq!(alert.suppression, Some(SuppressionReason::SleepWindow));

        // 12:00 UTC is 07:00 in New York: the window has ended.
        let at = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(
            ctl.on_event(&event(at, DetectionKind::FallConfirmed, RiskLevel::Critical))
                .unwrap()
                .state,
            AlertState::Pending
        );
    }

    #[test]
    fn test_sit_down_filter() {
        let mut ctl = controller();
        let mut warning = event(noon(), DetectionKind::PreFallWarning, RiskLevel::Medium);
        warning.last_sit_down_at = Some(noon() - Duration::seconds(1));
        let alert = ctl.on_event(&warning).unwrap();
        assert_eq!(alert.suppression, Some(SuppressionReason::SitTransition));

        // High severity passes the filter.
        let mut hard = fall(noon() + Duration::seconds(1), RiskLevel::High);
        hard.last_sit_down_at = Some(noon());
        assert_eq!(ctl.on_event(&hard).unwrap().state, AlertState::Pending);
    }

    #[test]
    fn test_rate_limit_and_escalation() {
        let mut ctl = controller();
        let first = ctl.on_event(&fall(noon(), RiskLevel::High)).unwrap();
        ctl.tick(noon() + Duration::seconds(10));

        let second = ctl
            .on_event(&fall(noon() + Duration::seconds(5), RiskLevel::High))
            .unwrap();
        assert_eq!(second.suppression, Some(SuppressionReason::RateLimited));

        let third = ctl
            .on_event(&fall(noon() + Duration::seconds(40), RiskLevel::Critical))
            .unwrap();
        assert_eq!(third.state, AlertState::Pending);
        assert_ne!(third.id, first.id);
        assert_eq!(ctl.stats().rate_limited, 1);
    }

    #[test]
    fn test_higher_severity_merges_into_pending() {
        let mut ctl = controller();
        let alert = ctl
            .on_event(&event(noon(), DetectionKind::WearAnomaly, RiskLevel::Medium))
            .unwrap();
        assert!(ctl
            .on_event(&fall(noon() + Duration::seconds(2), RiskLevel::High))
            .is_none());

        let pending = ctl.pending().unwrap();
        assert_eq!(pending.id, alert.id);
        assert_eq!(pending.severity, RiskLevel::High);
        assert_eq!(pending.kind, DetectionKind::FallConfirmed);
        assert_eq!(pending.event_count, 2);
        // The window is not restarted by a merge.
        assert_eq!(pending.expires_at, noon() + Duration::seconds(10));
    }

    #[test]
    fn test_cancel_within_window() {
        let mut ctl = controller();
        let alert = ctl.on_event(&fall(noon(), RiskLevel::High)).unwrap();

        ctl.cancel(alert.id, &subject(), noon() + Duration::seconds(3))
            .unwrap();
        assert_eq!(ctl.find(alert.id).unwrap().state, AlertState::Cancelled);
        assert_eq!(
            ctl.cancel(alert.id, &subject(), noon() + Duration::seconds(4)),
            Err(CancelError::AlreadyResolved(alert.id))
        );
        assert!(ctl.tick(noon() + Duration::seconds(30)).is_empty());
        assert_eq!(ctl.outbox_len(), 0);
    }

    #[test]
    fn test_late_cancel_is_already_resolved() {
        let mut ctl = controller();
        let alert = ctl.on_event(&fall(noon(), RiskLevel::High)).unwrap();

        let result = ctl.cancel(alert.id, &subject(), noon() + Duration::seconds(11));
        assert_eq!(result, Err(CancelError::AlreadyResolved(alert.id)));
        assert_eq!(ctl.outbox_len(), 1);
    }

    #[test]
    fn test_cancel_unknown_or_foreign() {
        let mut ctl = controller();
        let alert = ctl.on_event(&fall(noon(), RiskLevel::High)).unwrap();

        let unknown = Uuid::new_v4();
        assert_eq!(
            ctl.cancel(unknown, &subject(), noon()),
            Err(CancelError::NotFound(unknown))
        );
        assert!(matches!(
            ctl.cancel(alert.id, &SubjectId::from("someone-else"), noon()),
            Err(CancelError::NotFound(_))
        ));
        assert_eq!(ctl.pending().unwrap().state, AlertState::Pending);
    }

    #[test]
    fn test_acknowledge() {
        let mut ctl = controller();
        let alert = ctl.on_event(&fall(noon(), RiskLevel::High)).unwrap();
        assert_eq!(
            ctl.acknowledge(alert.id, noon()),
            Err(AcknowledgeError::NotConfirmed(alert.id))
        );

        ctl.tick(noon() + Duration::seconds(10));
        ctl.acknowledge(alert.id, noon() + Duration::seconds(20)).unwrap();
        assert_eq!(ctl.find(alert.id).unwrap().state, AlertState::Acknowledged);
        assert!(matches!(
            ctl.acknowledge(Uuid::new_v4(), noon()),
            Err(AcknowledgeError::NotFound(_))
        ));
    }

    #[test]
    fn test_out_of_order_event_dropped() {
        let mut ctl = controller();
        ctl.on_event(&fall(noon(), RiskLevel::High)).unwrap();
        assert!(ctl
            .on_event(&fall(noon() - Duration::seconds(1), RiskLevel::Critical))
            .is_none());
        assert_eq!(ctl.pending().unwrap().severity, RiskLevel::High);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut policy = AlertPolicy::default();
        policy.history_limit = 2;
        policy.min_alert_interval = std::time::Duration::ZERO;
        let mut ctl = AlertController::new(subject(), policy).unwrap();

        for i in 0..5 {
            let at = noon() + Duration::seconds(i * 20);
            ctl.on_event(&fall(at, RiskLevel::High)).unwrap();
            ctl.tick(at + Duration::seconds(10));
        }
        assert_eq!(ctl.history().count(), 2);
        assert_eq!(ctl.outbox_len(), 5);
    }

    #[test]
    fn test_cancel_after_history_eviction_is_already_resolved() {
        let mut policy = AlertPolicy::default();
        policy.history_limit = 1;
        policy.min_alert_interval = std::time::Duration::ZERO;
        let mut ctl = AlertController::new(subject(), policy).unwrap();

        let first = ctl.on_event(&fall(noon(), RiskLevel::High)).unwrap();
        ctl.tick(noon() + Duration::seconds(10));
        let later = noon() + Duration::seconds(20);
        ctl.on_event(&fall(later, RiskLevel::High)).unwrap();
        ctl.tick(later + Duration::seconds(10));

        assert!(ctl.find(first.id).is_none());
        assert_eq!(
            ctl.cancel(first.id, &subject(), later + Duration::seconds(11)),
            Err(CancelError::AlreadyResolved(first.id))
        );
        let unknown = Uuid::new_v4();
        assert_eq!(
            ctl.cancel(unknown, &subject(), later + Duration::seconds(11)),
            Err(CancelError::NotFound(unknown))
        );
    }

    #[test]
    fn test_requeued_archive_keeps_order() {
        let mut ctl = controller();
        let first = ctl.on_event(&fall(noon(), RiskLevel::High)).unwrap();
        ctl.cancel(first.id, &subject(), noon() + Duration::seconds(2)).unwrap();
        let mut taken = ctl.take_archived();
        assert_eq!(ctl.archive_len(), 0);

        let second = ctl
            .on_event(&fall(noon() + Duration::seconds(5), RiskLevel::High))
            .unwrap();
        assert_eq!(second.suppression, Some(SuppressionReason::RateLimited));

        ctl.requeue_archived(taken.drain(..));
        let ids: Vec<_> = ctl.take_archived().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn test_serialized_alert_uses_type_field() {
        let mut ctl = controller();
        let alert = ctl.on_event(&fall(noon(), RiskLevel::High)).unwrap();
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["type"], "fall_confirmed");
        assert_eq!(json["state"], "pending");
    }
}
