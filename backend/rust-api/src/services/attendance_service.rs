use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::effective_status::build_attendance_list;
use super::{AttendanceNotifier, PresenceError};
use crate::metrics::{HEARTBEATS_TOTAL, STATUS_TRANSITIONS_TOTAL, TRANSITION_CONFLICTS_TOTAL};
use crate::models::{
    ActivityLogEntry, AttendanceListResponse, AttendanceQuery, AttentionState, ChangeKind,
    TransitionWrite,
};
use crate::store::{PresenceStore, StoreError};
use crate::utils::retry::{retry_async_if, RetryConfig};
use crate::utils::time::{truncate_to_second, whole_seconds_between};

/// What a single report did to the attendance record.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// Same state as stored; only `last_heartbeat` advanced.
    KeepAlive,
    /// State changed; carries the interval that was closed.
    Transition(ActivityLogEntry),
}

impl ReportOutcome {
    pub fn is_transition(&self) -> bool {
        matches!(self, ReportOutcome::Transition(_))
    }
}

/// Server-side authority over attendance rows.
pub struct AttendanceService {
    store: Arc<dyn PresenceStore>,
    notifier: AttendanceNotifier,
    offline_timeout: Duration,
    retry: RetryConfig,
}

impl AttendanceService {
    pub fn new(
        store: Arc<dyn PresenceStore>,
        notifier: AttendanceNotifier,
        offline_timeout: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            offline_timeout,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Applies a heartbeat reported at `now`.
    ///
    /// A transition whose compare-and-swap loses to a concurrent writer is
    /// re-read and re-applied; a fresh read may turn it into a keep-alive.
    pub async fn report(
        &self,
        session_id: &str,
        student_id: &str,
        state: AttentionState,
        now: DateTime<Utc>,
    ) -> Result<ReportOutcome, PresenceError> {
        let now = truncate_to_second(now);
        let result = retry_async_if(
            self.retry.clone(),
            PresenceError::is_write_conflict,
            || self.try_report(session_id, student_id, state, now),
        )
        .await;

        if let Err(ref e) = result {
            if e.is_write_conflict() {
                TRANSITION_CONFLICTS_TOTAL
                    .with_label_values(&["exhausted"])
                    .inc();
                tracing::warn!(
                    "Gave up on transition for {}:{} after repeated conflicts",
                    session_id,
                    student_id
                );
            }
        }

        let outcome = result?;
        let kind = if outcome.is_transition() {
            ChangeKind::Transition
        } else {
            ChangeKind::Heartbeat
        };
        self.notifier.notify(session_id, Some(student_id), kind);
        Ok(outcome)
    }

    async fn try_report(
        &self,
        session_id: &str,
        student_id: &str,
        state: AttentionState,
        now: DateTime<Utc>,
    ) -> Result<ReportOutcome, PresenceError> {
        let record = self
            .store
            .find_attendance(session_id, student_id)
            .await?
            .ok_or_else(|| PresenceError::not_found("Attendance record not found"))?;

        if record.current_status == state {
            if !self
                .store
                .touch_heartbeat(session_id, student_id, now)
                .await?
            {
                return Err(PresenceError::not_found("Attendance record not found"));
            }
            HEARTBEATS_TOTAL.with_label_values(&["keepalive"]).inc();
            return Ok(ReportOutcome::KeepAlive);
        }

        // A late report must not open an interval before the stored ones.
        let at = now
            .max(record.last_heartbeat)
            .max(record.last_status_change);
        let entry = ActivityLogEntry {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            student_id: student_id.to_string(),
            status: record.current_status,
            timestamp: record.last_status_change,
            duration: whole_seconds_between(record.last_status_change, at),
        };
        let write = TransitionWrite {
            session_id: session_id.to_string(),
            student_id: student_id.to_string(),
            expected_status: record.current_status,
            expected_last_change: record.last_status_change,
            new_status: state,
            at,
            entry,
        };

        match self.store.apply_transition(&write).await {
            Ok(()) => {}
            Err(StoreError::WriteConflict) => {
                TRANSITION_CONFLICTS_TOTAL.with_label_values(&["lost"]).inc();
                return Err(StoreError::WriteConflict.into());
            }
            Err(e) => return Err(e.into()),
        }

        HEARTBEATS_TOTAL.with_label_values(&["transition"]).inc();
        STATUS_TRANSITIONS_TOTAL
            .with_label_values(&[record.current_status.as_str(), state.as_str()])
            .inc();
        tracing::debug!(
            "Attendance {}:{} {} -> {} after {}s",
            session_id,
            student_id,
            record.current_status.as_str(),
            state.as_str(),
            write.entry.duration
        );

        Ok(ReportOutcome::Transition(write.entry))
    }

    /// Touches `hand_raised` only.
    pub async fn set_hand_raised(
        &self,
        session_id: &str,
        student_id: &str,
        raised: bool,
    ) -> Result<(), PresenceError> {
        if !self
            .store
            .set_hand_raised(session_id, student_id, raised)
            .await?
        {
            return Err(PresenceError::not_found("Attendance record not found"));
        }
        self.notifier
            .notify(session_id, Some(student_id), ChangeKind::HandRaised);
        Ok(())
    }

    pub async fn list_attendance(
        &self,
        session_id: &str,
        query: &AttendanceQuery,
        now: DateTime<Utc>,
    ) -> Result<AttendanceListResponse, PresenceError> {
        let rows = self.store.list_attendance(session_id).await?;
        Ok(build_attendance_list(
            session_id,
            rows,
            query,
            now,
            self.offline_timeout,
        ))
    }

    pub async fn session_activity(
        &self,
        session_id: &str,
        student_id: &str,
    ) -> Result<Vec<ActivityLogEntry>, PresenceError> {
        Ok(self
            .store
            .list_session_activity(session_id, student_id)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EffectiveStatus;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 100,
            base_backoff: std::time::Duration::from_millis(1),
            max_backoff: std::time::Duration::from_millis(2),
            jitter_max: Some(std::time::Duration::from_millis(1)),
        }
    }

    async fn service_with_joined_student() -> (AttendanceService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.upsert_attendance_on_join("s1", "st1", t(0)).await.unwrap();
        let service = AttendanceService::new(
            store.clone(),
            AttendanceNotifier::new(None),
            Duration::seconds(60),
        )
        .with_retry(fast_retry());
        (service, store)
    }

    fn assert_contiguous(entries: &[ActivityLogEntry]) {
        for pair in entries.windows(2) {
            assert_eq!(
                pair[0].timestamp + Duration::seconds(pair[0].duration),
                pair[1].timestamp,
                "gap or overlap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[tokio::test]
    async fn report_without_join_is_not_found() {
        let (service, _) = service_with_joined_student().await;

        let err = service
            .report("s1", "stranger", AttentionState::Active, t(5))
            .await
            .unwrap_err();

        assert!(matches!(err, PresenceError::NotFound(_)));
    }

    #[tokio::test]
    async fn transition_closes_previous_interval() {
        let (service, store) = service_with_joined_student().await;

        service
            .report("s1", "st1", AttentionState::Active, t(0))
            .await
            .unwrap();
        let outcome = service
            .report("s1", "st1", AttentionState::Distracted, t(10))
            .await
            .unwrap();

        let ReportOutcome::Transition(entry) = outcome else {
            panic!("expected a transition");
        };
        assert_eq!(entry.status, AttentionState::Active);
        assert_eq!(entry.timestamp, t(0));
        assert_eq!(entry.duration, 10);

        let record = store.find_attendance("s1", "st1").await.unwrap().unwrap();
        assert_eq!(record.current_status, AttentionState::Distracted);
        assert_eq!(record.last_status_change, t(10));
        assert_eq!(record.last_heartbeat, t(10));
        assert_eq!(store.activity_log_len().await, 1);
    }

    #[tokio::test]
    async fn repeated_state_only_advances_heartbeat() {
        let (service, store) = service_with_joined_student().await;

        let first = service
            .report("s1", "st1", AttentionState::Active, t(30))
            .await
            .unwrap();
        let second = service
            .report("s1", "st1", AttentionState::Active, t(60))
            .await
            .unwrap();

        assert_eq!(first, ReportOutcome::KeepAlive);
        assert_eq!(second, ReportOutcome::KeepAlive);
        let record = store.find_attendance("s1", "st1").await.unwrap().unwrap();
        assert_eq!(record.last_heartbeat, t(60));
        assert_eq!(record.last_status_change, t(0));
        assert_eq!(store.activity_log_len().await, 0);
    }

    #[tokio::test]
    async fn out_of_order_reports_keep_heartbeat_monotonic() {
        let (service, store) = service_with_joined_student().await;
        let mut previous = t(0);

        for (secs, state) in [
            (20, AttentionState::Active),
            (5, AttentionState::Active),
            (40, AttentionState::Idle),
            (35, AttentionState::Idle),
            (30, AttentionState::Active),
            (50, AttentionState::Active),
        ] {
            service.report("s1", "st1", state, t(secs)).await.unwrap();
            let record = store.find_attendance("s1", "st1").await.unwrap().unwrap();
            assert!(record.last_heartbeat >= previous);
            assert!(record.last_status_change <= record.last_heartbeat);
            previous = record.last_heartbeat;
        }

        assert_eq!(previous, t(50));
    }

    #[tokio::test]
    async fn history_stays_gapless_across_many_transitions() {
        let (service, store) = service_with_joined_student().await;
        let states = [
            AttentionState::Distracted,
            AttentionState::Idle,
            AttentionState::Active,
            AttentionState::Idle,
            AttentionState::Distracted,
            AttentionState::Active,
        ];

        for (i, state) in states.iter().enumerate() {
            service
                .report("s1", "st1", *state, t(7 * (i as i64 + 1)))
                .await
                .unwrap();
        }

        let entries = service.session_activity("s1", "st1").await.unwrap();
        assert_eq!(entries.len(), states.len());
        assert_eq!(entries[0].timestamp, t(0));
        assert_contiguous(&entries);

        let record = store.find_attendance("s1", "st1").await.unwrap().unwrap();
        let last = entries.last().unwrap();
        assert_eq!(
            last.timestamp + Duration::seconds(last.duration),
            record.last_status_change
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_transitions_do_not_corrupt_history() {
        let (service, store) = service_with_joined_student().await;
        let service = Arc::new(service);
        let states = [
            AttentionState::Distracted,
            AttentionState::Idle,
            AttentionState::Active,
        ];

        let mut handles = Vec::new();
        for i in 0..24i64 {
            let service = service.clone();
            let state = states[(i % 3) as usize];
            handles.push(tokio::spawn(async move {
                service.report("s1", "st1", state, t(i + 1)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let entries = service.session_activity("s1", "st1").await.unwrap();
        assert_contiguous(&entries);
        let record = store.find_attendance("s1", "st1").await.unwrap().unwrap();
        if let Some(last) = entries.last() {
            assert_eq!(
                last.timestamp + Duration::seconds(last.duration),
                record.last_status_change
            );
        }
        assert!(record.last_status_change <= record.last_heartbeat);
    }

    #[tokio::test]
    async fn hand_raise_leaves_status_timing_alone() {
        let (service, store) = service_with_joined_student().await;
        service
            .report("s1", "st1", AttentionState::Idle, t(12))
            .await
            .unwrap();
        let before = store.find_attendance("s1", "st1").await.unwrap().unwrap();

        service.set_hand_raised("s1", "st1", true).await.unwrap();
        let raised = store.find_attendance("s1", "st1").await.unwrap().unwrap();
        service.set_hand_raised("s1", "st1", false).await.unwrap();
        let lowered = store.find_attendance("s1", "st1").await.unwrap().unwrap();

        assert!(raised.hand_raised);
        assert!(!lowered.hand_raised);
        for record in [&raised, &lowered] {
            assert_eq!(record.current_status, before.current_status);
            assert_eq!(record.last_status_change, before.last_status_change);
            assert_eq!(record.last_heartbeat, before.last_heartbeat);
        }
    }

    #[tokio::test]
    async fn hand_raise_without_join_is_not_found() {
        let (service, _) = service_with_joined_student().await;
        let err = service
            .set_hand_raised("s1", "stranger", true)
            .await
            .unwrap_err();
        assert!(matches!(err, PresenceError::NotFound(_)));
    }

    #[tokio::test]
    async fn reports_notify_subscribers() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_attendance_on_join("s1", "st1", t(0)).await.unwrap();
        let notifier = AttendanceNotifier::new(None);
        let mut rx = notifier.subscribe();
        let service = AttendanceService::new(store, notifier, Duration::seconds(60));

        service
            .report("s1", "st1", AttentionState::Distracted, t(3))
            .await
            .unwrap();

        let change = rx.recv().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Transition);
        assert_eq!(change.student_id.as_deref(), Some("st1"));
    }

    #[tokio::test]
    async fn listing_marks_silent_students_offline() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_student(crate::models::Student {
                id: "st1".to_string(),
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                username: "ada".to_string(),
                group_id: "g1".to_string(),
            })
            .await;
        store.upsert_attendance_on_join("s1", "st1", t(0)).await.unwrap();
        let service = AttendanceService::new(
            store,
            AttendanceNotifier::new(None),
            Duration::seconds(60),
        );

        let list = service
            .list_attendance("s1", &AttendanceQuery::default(), t(65))
            .await
            .unwrap();

        assert_eq!(list.students[0].effective_status, EffectiveStatus::Offline);
        assert_eq!(list.students[0].current_status, AttentionState::Active);
        assert_eq!(list.counts.offline, 1);
    }
}
