//! Read-time derivation of what the teacher sees.
//!
//! Nothing here touches storage: offline detection is purely a function of
//! the stored `last_heartbeat` and the current time, so it has to be
//! recomputed on every read.

use chrono::{DateTime, Duration, Utc};

use crate::models::{
    AttendanceListResponse, AttendanceQuery, AttendanceRecord, AttendanceSort, AttendanceView,
    AttendanceWithStudent, EffectiveStatus, StatusCounts,
};

pub fn effective_status(
    record: &AttendanceRecord,
    now: DateTime<Utc>,
    offline_timeout: Duration,
) -> EffectiveStatus {
    if now - record.last_heartbeat > offline_timeout {
        EffectiveStatus::Offline
    } else {
        record.current_status.into()
    }
}

/// Whole seconds until the record would be shown as offline; 0 once it is.
pub fn offline_in_seconds(
    record: &AttendanceRecord,
    now: DateTime<Utc>,
    offline_timeout: Duration,
) -> i64 {
    (offline_timeout - (now - record.last_heartbeat))
        .num_seconds()
        .max(0)
}

pub fn attendance_view(
    row: AttendanceWithStudent,
    now: DateTime<Utc>,
    offline_timeout: Duration,
) -> AttendanceView {
    let effective = effective_status(&row.record, now, offline_timeout);
    let offline_in = offline_in_seconds(&row.record, now, offline_timeout);
    let record = row.record;
    AttendanceView {
        id: record.id,
        current_status: record.current_status,
        last_heartbeat: record.last_heartbeat,
        last_status_change: record.last_status_change,
        hand_raised: record.hand_raised,
        student: row.student,
        effective_status: effective,
        offline_in_seconds: offline_in,
    }
}

pub fn count_by_status(views: &[AttendanceView]) -> StatusCounts {
    views
        .iter()
        .fold(StatusCounts::default(), |mut counts, view| {
            match view.effective_status {
                EffectiveStatus::Active => counts.active += 1,
                EffectiveStatus::Distracted => counts.distracted += 1,
                EffectiveStatus::Idle => counts.idle += 1,
                EffectiveStatus::Offline => counts.offline += 1,
            }
            counts
        })
}

/// Builds the dashboard payload from rows already ordered by name.
///
/// Counts cover the whole class; the filter only narrows `students`.
pub fn build_attendance_list(
    session_id: &str,
    rows: Vec<AttendanceWithStudent>,
    query: &AttendanceQuery,
    now: DateTime<Utc>,
    offline_timeout: Duration,
) -> AttendanceListResponse {
    let mut views: Vec<AttendanceView> = rows
        .into_iter()
        .map(|row| attendance_view(row, now, offline_timeout))
        .collect();
    let counts = count_by_status(&views);

    if let Some(status) = query.status {
        views.retain(|view| view.effective_status == status);
    }
    if query.sort == AttendanceSort::Priority {
        // stable: ties keep name order
        views.sort_by_key(|view| view.effective_status.priority());
    }

    AttendanceListResponse {
        session_id: session_id.to_string(),
        generated_at: now,
        counts,
        students: views,
    }
}
