use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use uuid::Uuid;

use super::{AttendanceNotifier, PresenceError};
use crate::metrics::{JOIN_ATTEMPTS_TOTAL, SESSIONS_ACTIVE, SESSIONS_TOTAL};
use crate::models::{ChangeKind, LessonInfo, LiveSession, SessionContent, Student};
use crate::store::{PresenceStore, StoreError};
use crate::utils::time::truncate_to_second;

/// Join codes avoid characters that read alike (0/O, 1/I).
const PASSWORD_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const PASSWORD_LENGTH: usize = 6;
const PASSWORD_ATTEMPTS: usize = 10;

const BAD_CREDENTIALS: &str = "Invalid username or session password";

pub fn generate_join_password() -> String {
    let mut rng = rand::rng();
    (0..PASSWORD_LENGTH)
        .map(|_| PASSWORD_ALPHABET[rng.random_range(0..PASSWORD_ALPHABET.len())] as char)
        .collect()
}

/// Join codes are typed by students; accept them in any case.
pub fn normalize_join_password(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Guards creation, joining and termination of live sessions.
pub struct SessionService {
    store: Arc<dyn PresenceStore>,
    notifier: AttendanceNotifier,
}

impl SessionService {
    pub fn new(store: Arc<dyn PresenceStore>, notifier: AttendanceNotifier) -> Self {
        Self { store, notifier }
    }

    /// Starts a session for a group and lesson the teacher owns.
    pub async fn start_session(
        &self,
        teacher_id: &str,
        group_id: &str,
        prepared_lesson_id: &str,
        now: DateTime<Utc>,
    ) -> Result<LiveSession, PresenceError> {
        self.start(teacher_id, group_id, prepared_lesson_id, None, now)
            .await
    }

    /// Starts a session from a calendar slot, which must carry both a group
    /// and a lesson.
    pub async fn start_scheduled_class(
        &self,
        teacher_id: &str,
        class_id: &str,
        now: DateTime<Utc>,
    ) -> Result<LiveSession, PresenceError> {
        let class = self
            .store
            .find_scheduled_class(class_id)
            .await?
            .ok_or_else(|| PresenceError::not_found("Scheduled class not found"))?;

        if class.teacher_id != teacher_id {
            return Err(PresenceError::forbidden(
                "Scheduled class belongs to another teacher",
            ));
        }

        let (Some(group_id), Some(lesson_id)) = (
            class.group_id.as_deref(),
            class.prepared_lesson_id.as_deref(),
        ) else {
            return Err(PresenceError::validation(
                "Scheduled class needs both a group and a prepared lesson",
            ));
        };

        self.start(teacher_id, group_id, lesson_id, Some(class.id.clone()), now)
            .await
    }

    async fn start(
        &self,
        teacher_id: &str,
        group_id: &str,
        prepared_lesson_id: &str,
        scheduled_class_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<LiveSession, PresenceError> {
        match self.store.find_group(group_id).await? {
            Some(group) if group.teacher_id == teacher_id => {}
            _ => {
                return Err(PresenceError::validation(
                    "Group is not assigned to this teacher",
                ))
            }
        }
        match self.store.find_lesson(prepared_lesson_id).await? {
            Some(lesson) if lesson.teacher_id == teacher_id => {}
            _ => {
                return Err(PresenceError::validation(
                    "Prepared lesson is not assigned to this teacher",
                ))
            }
        }

        if self
            .store
            .find_active_session_for_group(group_id)
            .await?
            .is_some()
        {
            return Err(PresenceError::conflict(
                "This group already has an active session",
            ));
        }

        let session = LiveSession {
            id: Uuid::new_v4().to_string(),
            teacher_id: teacher_id.to_string(),
            password: self.unused_password().await?,
            group_id: group_id.to_string(),
            prepared_lesson_id: prepared_lesson_id.to_string(),
            scheduled_class_id,
            is_active: true,
            started_at: now,
            ended_at: None,
        };

        // The check above can race with another start for the same group.
        match self.store.insert_session(&session).await {
            Ok(()) => {}
            Err(StoreError::ActiveSessionExists) => {
                return Err(PresenceError::conflict(
                    "This group already has an active session",
                ))
            }
            Err(e) => return Err(e.into()),
        }

        SESSIONS_TOTAL.with_label_values(&["started"]).inc();
        SESSIONS_ACTIVE.inc();
        tracing::info!(
            "Live session {} started by teacher {} for group {}",
            session.id,
            teacher_id,
            group_id
        );

        Ok(session)
    }

    async fn unused_password(&self) -> Result<String, PresenceError> {
        for _ in 0..PASSWORD_ATTEMPTS {
            let candidate = generate_join_password();
            if self
                .store
                .find_active_session_by_password(&candidate)
                .await?
                .is_none()
            {
                return Ok(candidate);
            }
        }
        Err(PresenceError::Storage(StoreError::Backend(anyhow::anyhow!(
            "could not find an unused join password after {} attempts",
            PASSWORD_ATTEMPTS
        ))))
    }

    /// Admits a student of the session's group and opens a fresh ACTIVE
    /// attendance window for them.
    ///
    /// Every credential failure yields the same `Unauthorized` message.
    pub async fn join(
        &self,
        username: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<(LiveSession, Student), PresenceError> {
        let password = normalize_join_password(password);
        let username = username.trim();

        let Some(session) = self
            .store
            .find_active_session_by_password(&password)
            .await?
        else {
            JOIN_ATTEMPTS_TOTAL.with_label_values(&["bad_password"]).inc();
            return Err(PresenceError::unauthorized(BAD_CREDENTIALS));
        };

        let Some(student) = self
            .store
            .find_student_in_group(&session.group_id, username)
            .await?
        else {
            JOIN_ATTEMPTS_TOTAL.with_label_values(&["not_in_group"]).inc();
            return Err(PresenceError::unauthorized(BAD_CREDENTIALS));
        };

        self.store
            .upsert_attendance_on_join(&session.id, &student.id, truncate_to_second(now))
            .await?;

        JOIN_ATTEMPTS_TOTAL.with_label_values(&["success"]).inc();
        self.notifier
            .notify(&session.id, Some(&student.id), ChangeKind::Joined);
        tracing::info!("Student {} joined session {}", student.id, session.id);

        Ok((session, student))
    }

    /// Ends the session. Ending an already ended session returns it unchanged.
    pub async fn end_session(
        &self,
        teacher_id: &str,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<LiveSession, PresenceError> {
        let existing = self.owned_session(teacher_id, session_id).await?;
        if !existing.is_active {
            return Ok(existing);
        }

        let (ended, ended_now) = self
            .store
            .deactivate_session(session_id, now)
            .await?
            .ok_or_else(|| PresenceError::not_found("Session not found"))?;

        // Only the call that flipped the flag owns the side effects.
        if ended_now {
            SESSIONS_TOTAL.with_label_values(&["ended"]).inc();
            SESSIONS_ACTIVE.dec();
            self.notifier
                .notify(session_id, None, ChangeKind::SessionEnded);
            tracing::info!("Live session {} ended by teacher {}", session_id, teacher_id);
        }

        Ok(ended)
    }

    /// Loads a session the teacher owns: 404 if missing, 403 if someone else's.
    pub async fn owned_session(
        &self,
        teacher_id: &str,
        session_id: &str,
    ) -> Result<LiveSession, PresenceError> {
        let session = self
            .store
            .find_session(session_id)
            .await?
            .ok_or_else(|| PresenceError::not_found("Session not found"))?;

        if session.teacher_id != teacher_id {
            return Err(PresenceError::forbidden(
                "Session belongs to another teacher",
            ));
        }

        Ok(session)
    }

    /// Lesson and ordered resources for a joined student's client.
    pub async fn session_content(&self, session_id: &str) -> Result<SessionContent, PresenceError> {
        let session = match self.store.find_session(session_id).await? {
            Some(session) if session.is_active => session,
            _ => return Err(PresenceError::gone("Session has ended")),
        };

        let lesson = self
            .store
            .find_lesson(&session.prepared_lesson_id)
            .await?
            .ok_or_else(|| PresenceError::not_found("Lesson not found"))?;

        let mut resources = lesson.resources;
        resources.sort_by_key(|r| r.position);

        Ok(SessionContent {
            session_id: session.id,
            lesson: LessonInfo {
                id: lesson.id,
                title: lesson.title,
                description: lesson.description,
            },
            resources,
        })
    }
}
