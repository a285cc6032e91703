use std::collections::HashSet;
use std::sync::Arc;

use super::PresenceError;
use crate::models::{
    ActivityLogEntry, AttentionState, Group, GroupStatsResponse, StudentStats, StudentStatsRow,
};
use crate::store::PresenceStore;

/// Aggregates a student's activity history.
///
/// `focus_score` is the rounded share of ACTIVE entries; with no history it is 0.
pub fn compute_stats(student_id: &str, entries: &[ActivityLogEntry]) -> StudentStats {
    let mut active = 0usize;
    let mut active_seconds = 0i64;
    let mut distracted_seconds = 0i64;
    let mut idle_seconds = 0i64;
    let mut sessions = HashSet::new();

    for entry in entries {
        sessions.insert(entry.session_id.as_str());
        match entry.status {
            AttentionState::Active => {
                active += 1;
                active_seconds += entry.duration;
            }
            AttentionState::Distracted => distracted_seconds += entry.duration,
            AttentionState::Idle => idle_seconds += entry.duration,
        }
    }

    let focus_score = if entries.is_empty() {
        0
    } else {
        ((active as f64 / entries.len() as f64) * 100.0).round() as u32
    };

    StudentStats {
        student_id: student_id.to_string(),
        focus_score,
        distractions: entries.len() - active,
        total_sessions: sessions.len(),
        active_seconds,
        distracted_seconds,
        idle_seconds,
    }
}

pub struct StatsService {
    store: Arc<dyn PresenceStore>,
}

impl StatsService {
    pub fn new(store: Arc<dyn PresenceStore>) -> Self {
        Self { store }
    }

    pub async fn student_stats(
        &self,
        teacher_id: &str,
        student_id: &str,
    ) -> Result<StudentStats, PresenceError> {
        let student = self
            .store
            .find_student(student_id)
            .await?
            .ok_or_else(|| PresenceError::not_found("Student not found"))?;
        self.owned_group(teacher_id, &student.group_id).await?;

        let entries = self.store.list_student_activity(student_id).await?;
        Ok(compute_stats(student_id, &entries))
    }

    pub async fn group_stats(
        &self,
        teacher_id: &str,
        group_id: &str,
    ) -> Result<GroupStatsResponse, PresenceError> {
        let group = self.owned_group(teacher_id, group_id).await?;
        let students = self.store.list_group_students(&group.id).await?;

        let mut rows = Vec::with_capacity(students.len());
        for student in students {
            let entries = self.store.list_student_activity(&student.id).await?;
            rows.push(StudentStatsRow {
                stats: compute_stats(&student.id, &entries),
                first_name: student.first_name,
                last_name: student.last_name,
                username: student.username,
            });
        }

        Ok(GroupStatsResponse {
            group_id: group.id,
            students: rows,
        })
    }

    async fn owned_group(&self, teacher_id: &str, group_id: &str) -> Result<Group, PresenceError> {
        let group = self
            .store
            .find_group(group_id)
            .await?
            .ok_or_else(|| PresenceError::not_found("Group not found"))?;
        if group.teacher_id != teacher_id {
            return Err(PresenceError::forbidden("Group belongs to another teacher"));
        }
        Ok(group)
    }
}
