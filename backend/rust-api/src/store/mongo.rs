use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::doc,
    error::{ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR},
    options::{FindOptions, IndexOptions},
    Client, Collection, Database, IndexModel,
};
use serde::{Deserialize, Serialize};

use super::{attendance_id, by_student_name, PresenceStore, StoreError, StoreResult};
use crate::metrics::track_db_operation;
use crate::models::{
    ActivityLogEntry, AttendanceRecord, AttendanceWithStudent, AttentionState, Group,
    LessonResource, LiveSession, PreparedLesson, ScheduledClass, Student, TransitionWrite,
};
use crate::utils::time::{bson_datetime_as_chrono, bson_datetime_as_chrono_option, chrono_to_bson};

const GROUPS: &str = "groups";
const STUDENTS: &str = "students";
const LESSONS: &str = "prepared_lessons";
const SCHEDULED_CLASSES: &str = "scheduled_classes";
const SESSIONS: &str = "live_sessions";
const ATTENDANCE: &str = "attendance";
const ACTIVITY_LOGS: &str = "activity_logs";

const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupDocument {
    #[serde(rename = "_id")]
    id: String,
    name: String,
    teacher_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudentDocument {
    #[serde(rename = "_id")]
    id: String,
    first_name: String,
    last_name: String,
    username: String,
    group_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LessonDocument {
    #[serde(rename = "_id")]
    id: String,
    teacher_id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    resources: Vec<LessonResource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduledClassDocument {
    #[serde(rename = "_id")]
    id: String,
    teacher_id: String,
    #[serde(default)]
    group_id: Option<String>,
    #[serde(default)]
    prepared_lesson_id: Option<String>,
    #[serde(with = "bson_datetime_as_chrono")]
    start_time: DateTime<Utc>,
    duration_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionDocument {
    #[serde(rename = "_id")]
    id: String,
    teacher_id: String,
    password: String,
    group_id: String,
    prepared_lesson_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scheduled_class_id: Option<String>,
    is_active: bool,
    #[serde(with = "bson_datetime_as_chrono")]
    started_at: DateTime<Utc>,
    #[serde(default, with = "bson_datetime_as_chrono_option")]
    ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttendanceDocument {
    #[serde(rename = "_id")]
    id: String,
    session_id: String,
    student_id: String,
    current_status: AttentionState,
    #[serde(with = "bson_datetime_as_chrono")]
    last_heartbeat: DateTime<Utc>,
    #[serde(with = "bson_datetime_as_chrono")]
    last_status_change: DateTime<Utc>,
    #[serde(default)]
    hand_raised: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityLogDocument {
    #[serde(rename = "_id")]
    id: String,
    session_id: String,
    student_id: String,
    status: AttentionState,
    #[serde(with = "bson_datetime_as_chrono")]
    timestamp: DateTime<Utc>,
    duration: i64,
}

impl From<GroupDocument> for Group {
    fn from(doc: GroupDocument) -> Self {
        Group {
            id: doc.id,
            name: doc.name,
            teacher_id: doc.teacher_id,
        }
    }
}

impl From<StudentDocument> for Student {
    fn from(doc: StudentDocument) -> Self {
        Student {
            id: doc.id,
            first_name: doc.first_name,
            last_name: doc.last_name,
            username: doc.username,
            group_id: doc.group_id,
        }
    }
}

impl From<LessonDocument> for PreparedLesson {
    fn from(doc: LessonDocument) -> Self {
        PreparedLesson {
            id: doc.id,
            teacher_id: doc.teacher_id,
            title: doc.title,
            description: doc.description,
            resources: doc.resources,
        }
    }
}

impl From<ScheduledClassDocument> for ScheduledClass {
    fn from(doc: ScheduledClassDocument) -> Self {
        ScheduledClass {
            id: doc.id,
            teacher_id: doc.teacher_id,
            group_id: doc.group_id,
            prepared_lesson_id: doc.prepared_lesson_id,
            start_time: doc.start_time,
            duration_minutes: doc.duration_minutes,
        }
    }
}

impl From<SessionDocument> for LiveSession {
    fn from(doc: SessionDocument) -> Self {
        LiveSession {
            id: doc.id,
            teacher_id: doc.teacher_id,
            password: doc.password,
            group_id: doc.group_id,
            prepared_lesson_id: doc.prepared_lesson_id,
            scheduled_class_id: doc.scheduled_class_id,
            is_active: doc.is_active,
            started_at: doc.started_at,
            ended_at: doc.ended_at,
        }
    }
}

impl From<&LiveSession> for SessionDocument {
    fn from(session: &LiveSession) -> Self {
        SessionDocument {
            id: session.id.clone(),
            teacher_id: session.teacher_id.clone(),
            password: session.password.clone(),
            group_id: session.group_id.clone(),
            prepared_lesson_id: session.prepared_lesson_id.clone(),
            scheduled_class_id: session.scheduled_class_id.clone(),
            is_active: session.is_active,
            started_at: session.started_at,
            ended_at: session.ended_at,
        }
    }
}

impl From<AttendanceDocument> for AttendanceRecord {
    fn from(doc: AttendanceDocument) -> Self {
        AttendanceRecord {
            id: doc.id,
            session_id: doc.session_id,
            student_id: doc.student_id,
            current_status: doc.current_status,
            last_heartbeat: doc.last_heartbeat,
            last_status_change: doc.last_status_change,
            hand_raised: doc.hand_raised,
        }
    }
}

impl From<ActivityLogDocument> for ActivityLogEntry {
    fn from(doc: ActivityLogDocument) -> Self {
        ActivityLogEntry {
            id: doc.id,
            session_id: doc.session_id,
            student_id: doc.student_id,
            status: doc.status,
            timestamp: doc.timestamp,
            duration: doc.duration,
        }
    }
}

impl From<&ActivityLogEntry> for ActivityLogDocument {
    fn from(entry: &ActivityLogEntry) -> Self {
        ActivityLogDocument {
            id: entry.id.clone(),
            session_id: entry.session_id.clone(),
            student_id: entry.student_id.clone(),
            status: entry.status,
            timestamp: entry.timestamp,
            duration: entry.duration,
        }
    }
}

/// MongoDB-backed store. Transition writes need a replica set (transactions).
pub struct MongoStore {
    client: Client,
    mongo: Database,
}

impl MongoStore {
    pub fn new(client: Client, database: &str) -> Self {
        let mongo = client.database(database);
        Self { client, mongo }
    }

    /// Creates the indexes the store relies on. Safe to call on every start.
    pub async fn ensure_indexes(&self) -> anyhow::Result<()> {
        let one_active_per_group = IndexModel::builder()
            .keys(doc! { "groupId": 1 })
            .options(
                IndexOptions::builder()
                    .name("one_active_session_per_group".to_string())
                    .unique(true)
                    .partial_filter_expression(doc! { "isActive": true })
                    .build(),
            )
            .build();
        let by_password = IndexModel::builder()
            .keys(doc! { "password": 1, "isActive": 1 })
            .build();
        self.sessions()
            .create_indexes([one_active_per_group, by_password])
            .await
            .context("Failed to create live_sessions indexes")?;

        self.attendance()
            .create_index(IndexModel::builder().keys(doc! { "sessionId": 1 }).build())
            .await
            .context("Failed to create attendance index")?;

        let by_pair = IndexModel::builder()
            .keys(doc! { "sessionId": 1, "studentId": 1, "timestamp": 1 })
            .build();
        let by_student = IndexModel::builder()
            .keys(doc! { "studentId": 1, "timestamp": 1 })
            .build();
        self.activity_logs()
            .create_indexes([by_pair, by_student])
            .await
            .context("Failed to create activity_logs indexes")?;

        tracing::info!("MongoDB indexes ensured");
        Ok(())
    }

    fn sessions(&self) -> Collection<SessionDocument> {
        self.mongo.collection(SESSIONS)
    }

    fn attendance(&self) -> Collection<AttendanceDocument> {
        self.mongo.collection(ATTENDANCE)
    }

    fn activity_logs(&self) -> Collection<ActivityLogDocument> {
        self.mongo.collection(ACTIVITY_LOGS)
    }

    fn students(&self) -> Collection<StudentDocument> {
        self.mongo.collection(STUDENTS)
    }

    async fn find_sessions_one(
        &self,
        filter: mongodb::bson::Document,
    ) -> StoreResult<Option<LiveSession>> {
        let session = track_db_operation("find_one", SESSIONS, async {
            self.sessions()
                .find_one(filter)
                .await
                .context("Failed to query live session")
        })
        .await?;
        Ok(session.map(LiveSession::from))
    }

    async fn load_activity(
        &self,
        filter: mongodb::bson::Document,
    ) -> StoreResult<Vec<ActivityLogEntry>> {
        let options = FindOptions::builder().sort(doc! { "timestamp": 1 }).build();
        let entries = track_db_operation("find", ACTIVITY_LOGS, async {
            let cursor = self
                .activity_logs()
                .find(filter)
                .with_options(options)
                .await
                .context("Failed to query activity log")?;
            cursor
                .try_collect::<Vec<_>>()
                .await
                .context("Failed to read activity log cursor")
        })
        .await?;
        Ok(entries.into_iter().map(ActivityLogEntry::from).collect())
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref we)) if we.code == DUPLICATE_KEY
    )
}

#[async_trait]
impl PresenceStore for MongoStore {
    async fn ping(&self) -> StoreResult<()> {
        self.mongo
            .run_command(doc! { "ping": 1 })
            .await
            .context("MongoDB ping failed")?;
        Ok(())
    }

    async fn find_group(&self, group_id: &str) -> StoreResult<Option<Group>> {
        let group = self
            .mongo
            .collection::<GroupDocument>(GROUPS)
            .find_one(doc! { "_id": group_id })
            .await
            .context("Failed to query group")?;
        Ok(group.map(Group::from))
    }

    async fn find_student(&self, student_id: &str) -> StoreResult<Option<Student>> {
        let student = self
            .students()
            .find_one(doc! { "_id": student_id })
            .await
            .context("Failed to query student")?;
        Ok(student.map(Student::from))
    }

    async fn find_student_in_group(
        &self,
        group_id: &str,
        username: &str,
    ) -> StoreResult<Option<Student>> {
        let student = self
            .students()
            .find_one(doc! { "groupId": group_id, "username": username })
            .await
            .context("Failed to query student by username")?;
        Ok(student.map(Student::from))
    }

    async fn list_group_students(&self, group_id: &str) -> StoreResult<Vec<Student>> {
        let cursor = self
            .students()
            .find(doc! { "groupId": group_id })
            .await
            .context("Failed to query group students")?;
        let docs: Vec<StudentDocument> = cursor
            .try_collect()
            .await
            .context("Failed to read students cursor")?;
        let mut students: Vec<Student> = docs.into_iter().map(Student::from).collect();
        students.sort_by(by_student_name);
        Ok(students)
    }

    async fn find_lesson(&self, lesson_id: &str) -> StoreResult<Option<PreparedLesson>> {
        let lesson = self
            .mongo
            .collection::<LessonDocument>(LESSONS)
            .find_one(doc! { "_id": lesson_id })
            .await
            .context("Failed to query prepared lesson")?;
        Ok(lesson.map(PreparedLesson::from))
    }

    async fn find_scheduled_class(&self, class_id: &str) -> StoreResult<Option<ScheduledClass>> {
        let class = self
            .mongo
            .collection::<ScheduledClassDocument>(SCHEDULED_CLASSES)
            .find_one(doc! { "_id": class_id })
            .await
            .context("Failed to query scheduled class")?;
        Ok(class.map(ScheduledClass::from))
    }

    async fn find_session(&self, session_id: &str) -> StoreResult<Option<LiveSession>> {
        self.find_sessions_one(doc! { "_id": session_id }).await
    }

    async fn find_active_session_for_group(
        &self,
        group_id: &str,
    ) -> StoreResult<Option<LiveSession>> {
        self.find_sessions_one(doc! { "groupId": group_id, "isActive": true })
            .await
    }

    async fn find_active_session_by_password(
        &self,
        password: &str,
    ) -> StoreResult<Option<LiveSession>> {
        self.find_sessions_one(doc! { "password": password, "isActive": true })
            .await
    }

    async fn insert_session(&self, session: &LiveSession) -> StoreResult<()> {
        let document = SessionDocument::from(session);
        match self.sessions().insert_one(&document).await {
            Ok(_) => Ok(()),
            // The partial unique index on groupId catches a concurrent start.
            Err(err) if is_duplicate_key(&err) => Err(StoreError::ActiveSessionExists),
            Err(err) => Err(anyhow::Error::new(err)
                .context("Failed to insert live session")
                .into()),
        }
    }

    async fn deactivate_session(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
    ) -> StoreResult<Option<(LiveSession, bool)>> {
        let result = self
            .sessions()
            .update_one(
                doc! { "_id": session_id, "isActive": true },
                doc! { "$set": { "isActive": false, "endedAt": chrono_to_bson(ended_at) } },
            )
            .await
            .context("Failed to end live session")?;
        let ended_now = result.modified_count > 0;
        Ok(self
            .find_session(session_id)
            .await?
            .map(|session| (session, ended_now)))
    }

    async fn upsert_attendance_on_join(
        &self,
        session_id: &str,
        student_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<AttendanceRecord> {
        let id = attendance_id(session_id, student_id);
        let now_bson = chrono_to_bson(now);
        track_db_operation("upsert", ATTENDANCE, async {
            self.attendance()
                .update_one(
                    doc! { "_id": &id },
                    doc! {
                        "$set": {
                            "sessionId": session_id,
                            "studentId": student_id,
                            "currentStatus": AttentionState::Active.as_str(),
                            "lastHeartbeat": now_bson,
                            "lastStatusChange": now_bson,
                            "handRaised": false,
                        }
                    },
                )
                .upsert(true)
                .await
                .context("Failed to upsert attendance record")
        })
        .await?;

        Ok(AttendanceRecord {
            id,
            session_id: session_id.to_string(),
            student_id: student_id.to_string(),
            current_status: AttentionState::Active,
            last_heartbeat: now,
            last_status_change: now,
            hand_raised: false,
        })
    }

    async fn find_attendance(
        &self,
        session_id: &str,
        student_id: &str,
    ) -> StoreResult<Option<AttendanceRecord>> {
        let id = attendance_id(session_id, student_id);
        let record = track_db_operation("find_one", ATTENDANCE, async {
            self.attendance()
                .find_one(doc! { "_id": &id })
                .await
                .context("Failed to query attendance record")
        })
        .await?;
        Ok(record.map(AttendanceRecord::from))
    }

    async fn touch_heartbeat(
        &self,
        session_id: &str,
        student_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let id = attendance_id(session_id, student_id);
        let result = track_db_operation("update", ATTENDANCE, async {
            self.attendance()
                .update_one(
                    doc! { "_id": &id },
                    doc! { "$max": { "lastHeartbeat": chrono_to_bson(at) } },
                )
                .await
                .context("Failed to record heartbeat")
        })
        .await?;
        Ok(result.matched_count > 0)
    }

    async fn apply_transition(&self, write: &TransitionWrite) -> StoreResult<()> {
        let id = attendance_id(&write.session_id, &write.student_id);
        let at = chrono_to_bson(write.at);
        let entry = ActivityLogDocument::from(&write.entry);

        let mut session = self
            .client
            .start_session()
            .await
            .context("Failed to start MongoDB session")?;
        session
            .start_transaction()
            .await
            .context("Failed to start transaction")?;

        let updated = self
            .attendance()
            .update_one(
                doc! {
                    "_id": &id,
                    "currentStatus": write.expected_status.as_str(),
                    "lastStatusChange": chrono_to_bson(write.expected_last_change),
                },
                doc! {
                    "$set": {
                        "currentStatus": write.new_status.as_str(),
                        "lastStatusChange": at,
                    },
                    "$max": { "lastHeartbeat": at },
                },
            )
            .session(&mut session)
            .await;

        let outcome = match updated {
            Ok(result) if result.matched_count == 0 => Err(StoreError::WriteConflict),
            Ok(_) => self
                .activity_logs()
                .insert_one(&entry)
                .session(&mut session)
                .await
                .map(|_| ())
                .map_err(transaction_error),
            Err(err) => Err(transaction_error(err)),
        };

        if let Err(err) = outcome {
            if let Err(abort_err) = session.abort_transaction().await {
                tracing::warn!("Failed to abort transition transaction: {}", abort_err);
            }
            return Err(err);
        }

        session
            .commit_transaction()
            .await
            .map_err(transaction_error)?;
        Ok(())
    }

    async fn set_hand_raised(
        &self,
        session_id: &str,
        student_id: &str,
        raised: bool,
    ) -> StoreResult<bool> {
        let id = attendance_id(session_id, student_id);
        let result = self
            .attendance()
            .update_one(doc! { "_id": &id }, doc! { "$set": { "handRaised": raised } })
            .await
            .context("Failed to update hand raise")?;
        Ok(result.matched_count > 0)
    }

    async fn list_attendance(&self, session_id: &str) -> StoreResult<Vec<AttendanceWithStudent>> {
        let records: Vec<AttendanceDocument> = track_db_operation("find", ATTENDANCE, async {
            let cursor = self
                .attendance()
                .find(doc! { "sessionId": session_id })
                .await
                .context("Failed to query attendance")?;
            cursor
                .try_collect::<Vec<_>>()
                .await
                .context("Failed to read attendance cursor")
        })
        .await?;

        if records.is_empty() {
            return Ok(Vec::new());
        }

        let student_ids: Vec<&str> = records.iter().map(|r| r.student_id.as_str()).collect();
        let cursor = self
            .students()
            .find(doc! { "_id": { "$in": student_ids } })
            .await
            .context("Failed to query attendance students")?;
        let students: HashMap<String, Student> = cursor
            .try_collect::<Vec<_>>()
            .await
            .context("Failed to read students cursor")?
            .into_iter()
            .map(|doc| (doc.id.clone(), Student::from(doc)))
            .collect();

        let mut rows: Vec<(Student, AttendanceRecord)> = records
            .into_iter()
            .filter_map(|record| {
                let student = students.get(&record.student_id)?.clone();
                Some((student, AttendanceRecord::from(record)))
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
        self.load_activity(doc! { "sessionId": session_id, "studentId": student_id })
            .await
    }

    async fn list_student_activity(&self, student_id: &str) -> StoreResult<Vec<ActivityLogEntry>> {
        self.load_activity(doc! { "studentId": student_id }).await
    }
}

fn transaction_error(err: mongodb::error::Error) -> StoreError {
    if err.contains_label(TRANSIENT_TRANSACTION_ERROR) {
        StoreError::WriteConflict
    } else {
        StoreError::Backend(anyhow::Error::new(err).context("Transition transaction failed"))
    }
}
