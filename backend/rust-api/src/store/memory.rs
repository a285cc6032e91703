use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{attendance_id, by_student_name, PresenceStore, StoreError, StoreResult};
use crate::models::{
    ActivityLogEntry, AttendanceRecord, AttendanceWithStudent, AttentionState, Group, LiveSession,
    PreparedLesson, ScheduledClass, Student, TransitionWrite,
};

#[derive(Default)]
struct MemoryState {
    groups: HashMap<String, Group>,
    students: HashMap<String, Student>,
    lessons: HashMap<String, PreparedLesson>,
    scheduled_classes: HashMap<String, ScheduledClass>,
    sessions: HashMap<String, LiveSession>,
    attendance: HashMap<String, AttendanceRecord>,
    activity_log: Vec<ActivityLogEntry>,
}

/// In-process store. Every write happens under one lock, which gives the
/// per-row serialization the reconciler needs.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_group(&self, group: Group) {
        let mut state = self.state.write().await;
        state.groups.insert(group.id.clone(), group);
    }

    pub async fn add_student(&self, student: Student) {
        let mut state = self.state.write().await;
        state.students.insert(student.id.clone(), student);
    }

    pub async fn add_lesson(&self, lesson: PreparedLesson) {
        let mut state = self.state.write().await;
        state.lessons.insert(lesson.id.clone(), lesson);
    }

    pub async fn add_scheduled_class(&self, class: ScheduledClass) {
        let mut state = self.state.write().await;
        state.scheduled_classes.insert(class.id.clone(), class);
    }

    pub async fn activity_log_len(&self) -> usize {
        self.state.read().await.activity_log.len()
    }
}

#[async_trait]
impl PresenceStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn find_group(&self, group_id: &str) -> StoreResult<Option<Group>> {
        Ok(self.state.read().await.groups.get(group_id).cloned())
    }

    async fn find_student(&self, student_id: &str) -> StoreResult<Option<Student>> {
        Ok(self.state.read().await.students.get(student_id).cloned())
    }

    async fn find_student_in_group(
        &self,
        group_id: &str,
        username: &str,
    ) -> StoreResult<Option<Student>> {
        let state = self.state.read().await;
        Ok(state
            .students
            .values()
            .find(|s| s.group_id == group_id && s.username == username)
            .cloned())
    }

    async fn list_group_students(&self, group_id: &str) -> StoreResult<Vec<Student>> {
        let state = self.state.read().await;
        let mut students: Vec<Student> = state
            .students
            .values()
            .filter(|s| s.group_id == group_id)
            .cloned()
            .collect();
        students.sort_by(by_student_name);
        Ok(students)
    }

    async fn find_lesson(&self, lesson_id: &str) -> StoreResult<Option<PreparedLesson>> {
        Ok(self.state.read().await.lessons.get(lesson_id).cloned())
    }

    async fn find_scheduled_class(&self, class_id: &str) -> StoreResult<Option<ScheduledClass>> {
        Ok(self
            .state
            .read()
            .await
            .scheduled_classes
            .get(class_id)
            .cloned())
    }

    async fn find_session(&self, session_id: &str) -> StoreResult<Option<LiveSession>> {
        Ok(self.state.read().await.sessions.get(session_id).cloned())
    }

    async fn find_active_session_for_group(
        &self,
        group_id: &str,
    ) -> StoreResult<Option<LiveSession>> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .values()
            .find(|s| s.is_active && s.group_id == group_id)
            .cloned())
    }

    async fn find_active_session_by_password(
        &self,
        password: &str,
    ) -> StoreResult<Option<LiveSession>> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .values()
            .find(|s| s.is_active && s.password == password)
            .cloned())
    }

    async fn insert_session(&self, session: &LiveSession) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let taken = state
            .sessions
            .values()
            .any(|s| s.is_active && s.group_id == session.group_id);
        if session.is_active && taken {
            return Err(StoreError::ActiveSessionExists);
        }
        state.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn deactivate_session(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
    ) -> StoreResult<Option<(LiveSession, bool)>> {
        let mut state = self.state.write().await;
        Ok(state.sessions.get_mut(session_id).map(|session| {
            let was_active = session.is_active;
            if was_active {
                session.is_active = false;
                session.ended_at = Some(ended_at);
            }
            (session.clone(), was_active)
        }))
    }

    async fn upsert_attendance_on_join(
        &self,
        session_id: &str,
        student_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<AttendanceRecord> {
        let mut state = self.state.write().await;
        let id = attendance_id(session_id, student_id);
        let record = AttendanceRecord {
            id: id.clone(),
            session_id: session_id.to_string(),
            student_id: student_id.to_string(),
            current_status: AttentionState::Active,
            last_heartbeat: now,
            last_status_change: now,
            hand_raised: false,
        };
        state.attendance.insert(id, record.clone());
        Ok(record)
    }

    async fn find_attendance(
        &self,
        session_id: &str,
        student_id: &str,
    ) -> StoreResult<Option<AttendanceRecord>> {
        let state = self.state.read().await;
        Ok(state
            .attendance
            .get(&attendance_id(session_id, student_id))
            .cloned())
    }

    async fn touch_heartbeat(
        &self,
        session_id: &str,
        student_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        match state
            .attendance
            .get_mut(&attendance_id(session_id, student_id))
        {
            Some(record) => {
                record.last_heartbeat = record.last_heartbeat.max(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn apply_transition(&self, write: &TransitionWrite) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let id = attendance_id(&write.session_id, &write.student_id);
        let record = state
            .attendance
            .get_mut(&id)
            .ok_or(StoreError::WriteConflict)?;

        if record.current_status != write.expected_status
            || record.last_status_change != write.expected_last_change
        {
            return Err(StoreError::WriteConflict);
        }

        record.current_status = write.new_status;
        record.last_status_change = write.at;
        record.last_heartbeat = record.last_heartbeat.max(write.at);
        state.activity_log.push(write.entry.clone());
        Ok(())
    }

    async fn set_hand_raised(
        &self,
        session_id: &str,
        student_id: &str,
        raised: bool,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        match state
            .attendance
            .get_mut(&attendance_id(session_id, student_id))
        {
            Some(record) => {
                record.hand_raised = raised;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_attendance(&self, session_id: &str) -> StoreResult<Vec<AttendanceWithStudent>> {
        let state = self.state.read().await;
        let mut rows: Vec<(Student, AttendanceRecord)> = state
            .attendance
            .values()
            .filter(|r| r.session_id == session_id)
            .filter_map(|r| {
                state
                    .students
                    .get(&r.student_id)
                    .map(|s| (s.clone(), r.clone()))
            })
            .collect();
        rows.sort_by(|a, b| by_student_name(&a.0, &b.0));
        Ok(rows
            .into_iter()
            .map(|(student, record)| AttendanceWithStudent {
                student: student.summary(),
                record,
            })
            .collect())
    }

    async fn list_session_activity(
        &self,
        session_id: &str,
        student_id: &str,
    ) -> StoreResult<Vec<ActivityLogEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<ActivityLogEntry> = state
            .activity_log
            .iter()
            .filter(|e| e.session_id == session_id && e.student_id == student_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }

    async fn list_student_activity(&self, student_id: &str) -> StoreResult<Vec<ActivityLogEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<ActivityLogEntry> = state
            .activity_log
            .iter()
            .filter(|e| e.student_id == student_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }
}
