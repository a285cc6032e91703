use serde::Serialize;

/// Per-student focus statistics derived from the activity log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStats {
    pub student_id: String,
    /// Share of ACTIVE entries among all entries, 0..=100.
    pub focus_score: u32,
    /// Entries that were not ACTIVE.
    pub distractions: usize,
    /// Distinct sessions present in the log.
    pub total_sessions: usize,
    pub active_seconds: i64,
    pub distracted_seconds: i64,
    pub idle_seconds: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStatsResponse {
    pub group_id: String,
    pub students: Vec<StudentStatsRow>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStatsRow {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    #[serde(flatten)]
    pub stats: StudentStats,
}
