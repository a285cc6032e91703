use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::attendance::StudentSummary;

/// Class group owned by a teacher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    pub teacher_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub group_id: String,
}

impl Student {
    pub fn summary(&self) -> StudentSummary {
        StudentSummary {
            id: self.id.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            username: self.username.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonResource {
    pub resource_id: String,
    pub title: String,
    pub kind: String,
    pub url: String,
    pub position: i32,
}

/// Lesson plan a teacher prepares ahead of a live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedLesson {
    pub id: String,
    pub teacher_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub resources: Vec<LessonResource>,
}

/// Calendar slot; group and lesson may still be unassigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledClass {
    pub id: String,
    pub teacher_id: String,
    pub group_id: Option<String>,
    pub prepared_lesson_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: u32,
}

/// Live lesson instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSession {
    pub id: String,
    pub teacher_id: String,
    /// Join code shown to the class.
    pub password: String,
    pub group_id: String,
    pub prepared_lesson_id: String,
    #[serde(default)]
    pub scheduled_class_id: Option<String>,
    pub is_active: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    #[validate(length(min = 1, message = "groupId is required"))]
    pub group_id: String,
    #[validate(length(min = 1, message = "preparedLessonId is required"))]
    pub prepared_lesson_id: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct JoinSessionRequest {
    #[validate(length(min = 1, max = 100, message = "username is required"))]
    pub username: String,
    #[validate(length(min = 1, max = 32, message = "password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSessionResponse {
    pub token: String,
    pub session_id: String,
    pub student: StudentSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonInfo {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
}

/// What a joined student's client polls for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContent {
    pub session_id: String,
    pub lesson: LessonInfo,
    pub resources: Vec<LessonResource>,
}
