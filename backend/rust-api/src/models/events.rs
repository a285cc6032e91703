use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attendance::AttendanceListResponse;

/// Published whenever an attendance row or its session changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceChange {
    pub session_id: String,
    #[serde(default)]
    pub student_id: Option<String>,
    pub kind: ChangeKind,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Joined,
    Heartbeat,
    Transition,
    HandRaised,
    SessionEnded,
}

/// Events pushed down the teacher's attendance stream.
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DashboardEvent {
    Attendance(AttendanceListResponse),
    SessionEnded(SessionEnded),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnded {
    pub session_id: String,
    pub ended_at: Option<DateTime<Utc>>,
}

impl DashboardEvent {
    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            DashboardEvent::Attendance(_) => "attendance",
            DashboardEvent::SessionEnded(_) => "session-ended",
        }
    }
}
