use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attention state observed on the student's client.
///
/// `Offline` is deliberately absent: it is derived server-side from heartbeat
/// staleness, see [`EffectiveStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttentionState {
    Active,
    Distracted,
    Idle,
}

impl AttentionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttentionState::Active => "ACTIVE",
            AttentionState::Distracted => "DISTRACTED",
            AttentionState::Idle => "IDLE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ACTIVE" => Some(AttentionState::Active),
            "DISTRACTED" => Some(AttentionState::Distracted),
            "IDLE" => Some(AttentionState::Idle),
            _ => None,
        }
    }
}

/// Status shown on the teacher dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectiveStatus {
    Active,
    Distracted,
    Idle,
    Offline,
}

impl EffectiveStatus {
    pub const ALL: [EffectiveStatus; 4] = [
        EffectiveStatus::Distracted,
        EffectiveStatus::Idle,
        EffectiveStatus::Active,
        EffectiveStatus::Offline,
    ];

    /// Lower value = needs the teacher's attention sooner.
    pub fn priority(&self) -> u8 {
        match self {
            EffectiveStatus::Distracted => 0,
            EffectiveStatus::Idle => 1,
            EffectiveStatus::Active => 2,
            EffectiveStatus::Offline => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EffectiveStatus::Active => "ACTIVE",
            EffectiveStatus::Distracted => "DISTRACTED",
            EffectiveStatus::Idle => "IDLE",
            EffectiveStatus::Offline => "OFFLINE",
        }
    }
}

impl From<AttentionState> for EffectiveStatus {
    fn from(state: AttentionState) -> Self {
        match state {
            AttentionState::Active => EffectiveStatus::Active,
            AttentionState::Distracted => EffectiveStatus::Distracted,
            AttentionState::Idle => EffectiveStatus::Idle,
        }
    }
}

/// Live attendance row, one per (session, student).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub session_id: String,
    pub student_id: String,
    pub current_status: AttentionState,
    /// Last time any report was received.
    pub last_heartbeat: DateTime<Utc>,
    /// Last time `current_status` changed value. Never later than `last_heartbeat`.
    pub last_status_change: DateTime<Utc>,
    pub hand_raised: bool,
}

/// Completed attention interval. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogEntry {
    pub id: String,
    pub session_id: String,
    pub student_id: String,
    /// The state that just ended.
    pub status: AttentionState,
    /// When that state began.
    pub timestamp: DateTime<Utc>,
    /// Whole seconds the state lasted.
    pub duration: i64,
}

/// Transition write handed to the store: append `entry` and move the record to
/// `new_status`, but only if the record still carries the expected values.
#[derive(Debug, Clone)]
pub struct TransitionWrite {
    pub session_id: String,
    pub student_id: String,
    pub expected_status: AttentionState,
    pub expected_last_change: DateTime<Utc>,
    pub new_status: AttentionState,
    pub at: DateTime<Utc>,
    pub entry: ActivityLogEntry,
}

#[derive(Debug, Deserialize, validator::Validate)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    #[validate(length(min = 1, message = "sessionId is required"))]
    pub session_id: String,
    pub status: AttentionState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub ok: bool,
    pub transition: bool,
}

#[derive(Debug, Deserialize)]
pub struct HandRaiseRequest {
    pub raised: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
}

/// Attendance row joined with the student, as stored.
#[derive(Debug, Clone)]
pub struct AttendanceWithStudent {
    pub record: AttendanceRecord,
    pub student: StudentSummary,
}

/// Row served to the teacher dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceView {
    pub id: String,
    pub current_status: AttentionState,
    pub last_heartbeat: DateTime<Utc>,
    pub last_status_change: DateTime<Utc>,
    pub hand_raised: bool,
    pub student: StudentSummary,
    pub effective_status: EffectiveStatus,
    /// Seconds left before the student is shown as offline.
    pub offline_in_seconds: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusCounts {
    #[serde(rename = "ACTIVE")]
    pub active: usize,
    #[serde(rename = "DISTRACTED")]
    pub distracted: usize,
    #[serde(rename = "IDLE")]
    pub idle: usize,
    #[serde(rename = "OFFLINE")]
    pub offline: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceListResponse {
    pub session_id: String,
    pub generated_at: DateTime<Utc>,
    pub counts: StatusCounts,
    pub students: Vec<AttendanceView>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceSort {
    #[default]
    Name,
    Priority,
}

#[derive(Debug, Default, Deserialize)]
pub struct AttendanceQuery {
    pub status: Option<EffectiveStatus>,
    #[serde(default)]
    pub sort: AttendanceSort,
}
