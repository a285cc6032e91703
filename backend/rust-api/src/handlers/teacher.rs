use axum::{
    extract::{Extension, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use validator::Validate;

use super::error::ApiError;
use crate::{
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::{AttendanceQuery, StartSessionRequest},
    services::{
        attendance_service::AttendanceService, session_service::SessionService,
        stats_service::StatsService, AppState,
    },
};

fn session_service(state: &AppState) -> SessionService {
    SessionService::new(state.store.clone(), state.notifier.clone())
}

fn attendance_service(state: &AppState) -> AttendanceService {
    AttendanceService::new(
        state.store.clone(),
        state.notifier.clone(),
        state.config.presence.offline_timeout(),
    )
}

/// POST /api/v1/teacher/sessions
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<StartSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    tracing::info!(
        "Teacher {} starting session for group {}",
        claims.sub,
        req.group_id
    );

    let session = session_service(&state)
        .start_session(&claims.sub, &req.group_id, &req.prepared_lesson_id, Utc::now())
        .await?;

    Ok((StatusCode::CREATED, Json(session)))
}

/// POST /api/v1/teacher/scheduled-classes/{id}/start
pub async fn start_scheduled_class(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(class_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session_service(&state)
        .start_scheduled_class(&claims.sub, &class_id, Utc::now())
        .await?;

    Ok((StatusCode::CREATED, Json(session)))
}

/// POST /api/v1/teacher/sessions/{id}/end
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session_service(&state)
        .end_session(&claims.sub, &session_id, Utc::now())
        .await?;

    Ok(Json(session))
}

/// GET /api/v1/teacher/sessions/{id}/attendance
///
/// Effective status depends on the time of the read, so nothing may cache it.
pub async fn attendance(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
    Query(query): Query<AttendanceQuery>,
) -> Result<impl IntoResponse, ApiError> {
    session_service(&state)
        .owned_session(&claims.sub, &session_id)
        .await?;

    let list = attendance_service(&state)
        .list_attendance(&session_id, &query, Utc::now())
        .await?;

    Ok((
        [
            (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(list),
    ))
}

/// GET /api/v1/teacher/sessions/{id}/students/{student_id}/activity
pub async fn student_activity(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path((session_id, student_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    session_service(&state)
        .owned_session(&claims.sub, &session_id)
        .await?;

    let entries = attendance_service(&state)
        .session_activity(&session_id, &student_id)
        .await?;

    Ok(Json(entries))
}

/// GET /api/v1/teacher/students/{id}/stats
pub async fn student_stats(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(student_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = StatsService::new(state.store.clone())
        .student_stats(&claims.sub, &student_id)
        .await?;

    Ok(Json(stats))
}

/// GET /api/v1/teacher/groups/{id}/stats
pub async fn group_stats(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(group_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = StatsService::new(state.store.clone())
        .group_stats(&claims.sub, &group_id)
        .await?;

    Ok(Json(stats))
}
