use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{LiveSession, Student};
use crate::services::AppState;

pub const ROLE_TEACHER: &str = "teacher";
pub const ROLE_STUDENT: &str = "student";

/// Cookie carrying the token issued on join.
pub const STUDENT_COOKIE: &str = "student_session";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtClaims {
    pub sub: String,  // teacher or student id
    pub role: String, // "teacher" | "student"
    /// Live session a student token is scoped to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub exp: usize,
    pub iat: usize,
}

impl JwtClaims {
    pub fn is_teacher(&self) -> bool {
        self.role == ROLE_TEACHER
    }

    /// Session id of a student principal; `None` for anyone else.
    pub fn student_session(&self) -> Option<&str> {
        if self.role == ROLE_STUDENT {
            self.session_id.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    ExpiredToken,
    #[error("Missing authorization token")]
    MissingToken,
    #[error("Invalid token signature")]
    InvalidSignature,
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn generate_token(&self, claims: &JwtClaims) -> Result<String, AuthError> {
        encode(&Header::default(), claims, &self.encoding_key).map_err(|_| AuthError::InvalidToken)
    }

    /// Token scoped to one live session, handed out on join.
    pub fn issue_student_token(
        &self,
        student: &Student,
        session: &LiveSession,
        ttl_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let iat = now.timestamp();
        let claims = JwtClaims {
            sub: student.id.clone(),
            role: ROLE_STUDENT.to_string(),
            session_id: Some(session.id.clone()),
            exp: (iat + ttl_secs).max(0) as usize,
            iat: iat.max(0) as usize,
        };
        self.generate_token(&claims)
    }

    pub fn validate_token(&self, token: &str) -> Result<JwtClaims, AuthError> {
        decode::<JwtClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::InvalidToken,
            })
    }
}

/// Bearer header first, then the student cookie.
fn token_from_request(headers: &HeaderMap, jar: &CookieJar) -> Result<String, AuthError> {
    if let Some(token) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Ok(token.trim().to_string());
    }

    jar.get(STUDENT_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(AuthError::MissingToken)
}

/// Validates the caller's token and stores its claims in request extensions.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = token_from_request(request.headers(), &jar).map_err(|e| {
        tracing::debug!("Rejected request: {}", e);
        StatusCode::UNAUTHORIZED
    })?;

    let jwt_service = JwtService::new(&state.config.jwt_secret);
    let claims = jwt_service.validate_token(&token).map_err(|e| {
        tracing::warn!("JWT validation failed: {}", e);
        StatusCode::UNAUTHORIZED
    })?;

    tracing::debug!("Authenticated {} (role: {})", claims.sub, claims.role);

    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

/// Non-students (including teachers) are unauthenticated on student routes.
pub async fn student_guard_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    let is_student = request
        .extensions()
        .get::<JwtClaims>()
        .and_then(JwtClaims::student_session)
        .is_some();
    if is_student {
        return Ok(next.run(request).await);
    }
    tracing::warn!("Access denied: student session token required");
    Err(StatusCode::UNAUTHORIZED)
}

pub async fn teacher_guard_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    if let Some(claims) = request.extensions().get::<JwtClaims>() {
        if claims.is_teacher() {
            return Ok(next.run(request).await);
        }
    }
    tracing::warn!("Access denied: teacher role required");
    Err(StatusCode::FORBIDDEN)
}
