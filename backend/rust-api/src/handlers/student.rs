use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use std::sync::Arc;
use validator::Validate;

use super::error::ApiError;
use crate::{
    extractors::AppJson,
    middlewares::auth::{JwtClaims, JwtService, STUDENT_COOKIE},
    models::{
        HandRaiseRequest, HeartbeatRequest, HeartbeatResponse, JoinSessionRequest,
        JoinSessionResponse,
    },
    services::{
        attendance_service::AttendanceService, session_service::SessionService, AppState,
    },
};

fn student_session(claims: &JwtClaims) -> Result<&str, ApiError> {
    claims
        .student_session()
        .ok_or_else(|| ApiError::unauthorized("Student session required"))
}

/// POST /api/v1/student/join
pub async fn join_session(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    AppJson(req): AppJson<JoinSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    let now = Utc::now();
    let service = SessionService::new(state.store.clone(), state.notifier.clone());
    let (session, student) = service.join(&req.username, &req.password, now).await?;

    let ttl = state.config.student_token_ttl_secs;
    let token = JwtService::new(&state.config.jwt_secret)
        .issue_student_token(&student, &session, ttl, now)
        .map_err(|e| {
            tracing::error!("Failed to issue student token: {}", e);
            ApiError::internal("Failed to issue session token")
        })?;

    let cookie = Cookie::build((STUDENT_COOKIE, token.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(ttl))
        .build();

    Ok((
        jar.add(cookie),
        Json(JoinSessionResponse {
            token,
            session_id: session.id,
            student: student.summary(),
        }),
    ))
}

/// POST /api/v1/student/heartbeat
pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    req.validate()?;
    let session_id = student_session(&claims)?;
    if session_id != req.session_id {
        return Err(ApiError::NotFound(
            "Attendance record not found".to_string(),
        ));
    }

    let service = AttendanceService::new(
        state.store.clone(),
        state.notifier.clone(),
        state.config.presence.offline_timeout(),
    );
    let outcome = service
        .report(&req.session_id, &claims.sub, req.status, Utc::now())
        .await?;

    Ok(Json(HeartbeatResponse {
        ok: true,
        transition: outcome.is_transition(),
    }))
}

/// POST /api/v1/student/hand
pub async fn set_hand(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<HandRaiseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = student_session(&claims)?;

    let service = AttendanceService::new(
        state.store.clone(),
        state.notifier.clone(),
        state.config.presence.offline_timeout(),
    );
    service
        .set_hand_raised(session_id, &claims.sub, req.raised)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/student/session
///
/// 410 once the teacher has ended the session; the client logs out on it.
pub async fn session_content(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = student_session(&claims)?;

    let service = SessionService::new(state.store.clone(), state.notifier.clone());
    let content = service.session_content(session_id).await?;

    Ok(Json(content))
}
