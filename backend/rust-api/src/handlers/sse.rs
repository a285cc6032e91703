use axum::{
    extract::{Extension, Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use chrono::Utc;
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

use super::error::ApiError;
use crate::{
    metrics::ATTENDANCE_STREAMS_ACTIVE,
    middlewares::auth::JwtClaims,
    models::{AttendanceChange, AttendanceQuery, DashboardEvent, SessionEnded},
    services::{
        attendance_service::AttendanceService, session_service::SessionService, AppState,
    },
};

/// Live attendance for the teacher dashboard.
/// GET /api/v1/teacher/sessions/{id}/attendance/stream
pub async fn attendance_stream(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    SessionService::new(state.store.clone(), state.notifier.clone())
        .owned_session(&claims.sub, &session_id)
        .await?;

    let tick = state.config.presence.stream_tick();
    tracing::info!(
        "Attendance stream opened: session={}, tick={}ms",
        session_id,
        tick.as_millis()
    );

    let changes = state.notifier.subscribe();
    let stream = create_attendance_stream(state, session_id, changes, tick);

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

struct StreamGuard;

impl StreamGuard {
    fn new() -> Self {
        ATTENDANCE_STREAMS_ACTIVE.inc();
        StreamGuard
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        ATTENDANCE_STREAMS_ACTIVE.dec();
    }
}

struct StreamState {
    app: Arc<AppState>,
    session_id: String,
    changes: broadcast::Receiver<AttendanceChange>,
    tick: Duration,
    first: bool,
    finished: bool,
    _guard: StreamGuard,
}

/// Snapshot immediately, then on every tick or change to this session,
/// until the session is no longer active.
fn create_attendance_stream(
    app: Arc<AppState>,
    session_id: String,
    changes: broadcast::Receiver<AttendanceChange>,
    tick: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let initial = StreamState {
        app,
        session_id,
        changes,
        tick,
        first: true,
        finished: false,
        _guard: StreamGuard::new(),
    };

    stream::unfold(initial, |mut st| async move {
        if st.finished {
            return None;
        }
        if !st.first {
            wait_for_refresh(&mut st.changes, &st.session_id, st.tick).await;
        }
        st.first = false;

        let event = match next_dashboard_event(&st.app, &st.session_id).await {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    "Attendance snapshot failed for session {}: {:?}",
                    st.session_id,
                    e
                );
                return Some((Ok(Event::default().comment("snapshot unavailable")), st));
            }
        };

        if matches!(event, DashboardEvent::SessionEnded(_)) {
            tracing::info!("Attendance stream closing: session={} ended", st.session_id);
            st.finished = true;
        }

        let sse = Event::default()
            .event(event.event_name())
            .data(event.to_sse_data());
        Some((Ok(sse), st))
    })
}

async fn wait_for_refresh(
    changes: &mut broadcast::Receiver<AttendanceChange>,
    session_id: &str,
    tick: Duration,
) {
    let sleep = tokio::time::sleep(tick);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return,
            change = changes.recv() => match change {
                Ok(change) if change.session_id == session_id => return,
                Ok(_) => continue,
                // Missed changes may include ours.
                Err(RecvError::Lagged(_)) => return,
                Err(RecvError::Closed) => {
                    (&mut sleep).await;
                    return;
                }
            },
        }
    }
}

async fn next_dashboard_event(
    app: &AppState,
    session_id: &str,
) -> Result<DashboardEvent, crate::services::PresenceError> {
    let session = app.store.find_session(session_id).await?;
    match session {
        Some(session) if session.is_active => {}
        other => {
            return Ok(DashboardEvent::SessionEnded(SessionEnded {
                session_id: session_id.to_string(),
                ended_at: other.and_then(|s| s.ended_at),
            }))
        }
    }

    let list = AttendanceService::new(
        app.store.clone(),
        app.notifier.clone(),
        app.config.presence.offline_timeout(),
    )
    .list_attendance(session_id, &AttendanceQuery::default(), Utc::now())
    .await?;

    Ok(DashboardEvent::Attendance(list))
}
