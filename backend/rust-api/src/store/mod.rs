//! Persistence seam for the presence core.
//!
//! Entities other than attendance and the activity log are owned by other
//! parts of the product; the core only reads them through this trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    ActivityLogEntry, AttendanceRecord, AttendanceWithStudent, Group, LiveSession,
    PreparedLesson, ScheduledClass, Student, TransitionWrite,
};

pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("group already has an active session")]
    ActiveSessionExists,
    #[error("attendance record changed concurrently")]
    WriteConflict,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    async fn find_group(&self, group_id: &str) -> StoreResult<Option<Group>>;
    async fn find_student(&self, student_id: &str) -> StoreResult<Option<Student>>;
    async fn find_student_in_group(
        &self,
        group_id: &str,
        username: &str,
    ) -> StoreResult<Option<Student>>;
    async fn list_group_students(&self, group_id: &str) -> StoreResult<Vec<Student>>;
    async fn find_lesson(&self, lesson_id: &str) -> StoreResult<Option<PreparedLesson>>;
    async fn find_scheduled_class(&self, class_id: &str) -> StoreResult<Option<ScheduledClass>>;

    async fn find_session(&self, session_id: &str) -> StoreResult<Option<LiveSession>>;
    async fn find_active_session_for_group(
        &self,
        group_id: &str,
    ) -> StoreResult<Option<LiveSession>>;
    async fn find_active_session_by_password(
        &self,
        password: &str,
    ) -> StoreResult<Option<LiveSession>>;
    /// Fails with [`StoreError::ActiveSessionExists`] if the group already has one.
    async fn insert_session(&self, session: &LiveSession) -> StoreResult<()>;
    /// Marks the session inactive and stamps `ended_at` if it is still active.
    /// Returns the stored session and whether this call ended it, or `None`
    /// if it does not exist.
    async fn deactivate_session(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
    ) -> StoreResult<Option<(LiveSession, bool)>>;

    /// Creates or resets the row to a fresh ACTIVE window starting at `now`.
    async fn upsert_attendance_on_join(
        &self,
        session_id: &str,
        student_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<AttendanceRecord>;
    async fn find_attendance(
        &self,
        session_id: &str,
        student_id: &str,
    ) -> StoreResult<Option<AttendanceRecord>>;
    /// Advances `last_heartbeat` to `at` unless it is already later.
    /// Returns false if the row does not exist.
    async fn touch_heartbeat(
        &self,
        session_id: &str,
        student_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;
    /// Appends the log entry and updates the row as one unit, only if the row
    /// still holds `expected_status` / `expected_last_change`. Otherwise
    /// fails with [`StoreError::WriteConflict`] and writes nothing.
    async fn apply_transition(&self, write: &TransitionWrite) -> StoreResult<()>;
    /// Touches `hand_raised` only. Returns false if the row does not exist.
    async fn set_hand_raised(
        &self,
        session_id: &str,
        student_id: &str,
        raised: bool,
    ) -> StoreResult<bool>;
    /// Rows for the session ordered by student last name, then first name.
    async fn list_attendance(&self, session_id: &str) -> StoreResult<Vec<AttendanceWithStudent>>;

    /// Entries for one (session, student), ordered by timestamp.
    async fn list_session_activity(
        &self,
        session_id: &str,
        student_id: &str,
    ) -> StoreResult<Vec<ActivityLogEntry>>;
    /// Every entry the student has across sessions.
    async fn list_student_activity(&self, student_id: &str) -> StoreResult<Vec<ActivityLogEntry>>;
}

pub(crate) fn attendance_id(session_id: &str, student_id: &str) -> String {
    format!("{}:{}", session_id, student_id)
}

pub(crate) fn by_student_name(a: &Student, b: &Student) -> std::cmp::Ordering {
    a.last_name
        .to_lowercase()
        .cmp(&b.last_name.to_lowercase())
        .then_with(|| a.first_name.to_lowercase().cmp(&b.first_name.to_lowercase()))
        .then_with(|| a.username.cmp(&b.username))
}
