#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use classroom_presence_api::{
    config::{Config, StorageBackend},
    create_router,
    middlewares::auth::{JwtClaims, JwtService, ROLE_TEACHER},
    models::{Group, LessonResource, PreparedLesson, ScheduledClass, Student},
    services::AppState,
    store::MemoryStore,
};

pub const TEST_SECRET: &str = "integration-test-secret";
pub const TEACHER: &str = "teacher-1";
pub const OTHER_TEACHER: &str = "teacher-2";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub state: Arc<AppState>,
}

pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub json: Value,
}

pub fn test_config() -> Config {
    Config {
        storage_backend: StorageBackend::Memory,
        jwt_secret: TEST_SECRET.to_string(),
        ..Config::default()
    }
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with(test_config()).await
}

pub async fn create_test_app_with(config: Config) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let store = Arc::new(MemoryStore::new());
    seed_test_data(&store).await;

    let state = Arc::new(AppState::with_store(config, store.clone(), None));
    TestApp {
        router: create_router(state.clone()),
        store,
        state,
    }
}

async fn seed_test_data(store: &MemoryStore) {
    store
        .add_group(Group {
            id: "g1".to_string(),
            name: "7B".to_string(),
            teacher_id: TEACHER.to_string(),
        })
        .await;
    store
        .add_group(Group {
            id: "g2".to_string(),
            name: "8A".to_string(),
            teacher_id: OTHER_TEACHER.to_string(),
        })
        .await;

    for (id, first, last, username, group) in [
        ("st-ada", "Ada", "Lovelace", "ada", "g1"),
        ("st-alan", "Alan", "Turing", "alan", "g1"),
        ("st-grace", "Grace", "Hopper", "grace", "g1"),
        ("st-linus", "Linus", "Torvalds", "linus", "g2"),
    ] {
        store
            .add_student(Student {
                id: id.to_string(),
                first_name: first.to_string(),
                last_name: last.to_string(),
                username: username.to_string(),
                group_id: group.to_string(),
            })
            .await;
    }

    store
        .add_lesson(PreparedLesson {
            id: "l1".to_string(),
            teacher_id: TEACHER.to_string(),
            title: "Fractions".to_string(),
            description: Some("Adding fractions with unlike denominators".to_string()),
            resources: vec![
                LessonResource {
                    resource_id: "r-quiz".to_string(),
                    title: "Quiz".to_string(),
                    kind: "quiz".to_string(),
                    url: "https://files.local/quiz".to_string(),
                    position: 2,
                },
                LessonResource {
                    resource_id: "r-video".to_string(),
                    title: "Intro video".to_string(),
                    kind: "video".to_string(),
                    url: "https://files.local/intro.mp4".to_string(),
                    position: 1,
                },
            ],
        })
        .await;
    store
        .add_lesson(PreparedLesson {
            id: "l2".to_string(),
            teacher_id: OTHER_TEACHER.to_string(),
            title: "Linux".to_string(),
            description: None,
            resources: vec![],
        })
        .await;

    store
        .add_scheduled_class(ScheduledClass {
            id: "class-ready".to_string(),
            teacher_id: TEACHER.to_string(),
            group_id: Some("g1".to_string()),
            prepared_lesson_id: Some("l1".to_string()),
            start_time: Utc::now(),
            duration_minutes: 45,
        })
        .await;
    store
        .add_scheduled_class(ScheduledClass {
            id: "class-no-lesson".to_string(),
            teacher_id: TEACHER.to_string(),
            group_id: Some("g1".to_string()),
            prepared_lesson_id: None,
            start_time: Utc::now(),
            duration_minutes: 45,
        })
        .await;
}

pub fn teacher_token(teacher_id: &str) -> String {
    let now = Utc::now();
    JwtService::new(TEST_SECRET)
        .generate_token(&JwtClaims {
            sub: teacher_id.to_string(),
            role: ROLE_TEACHER.to_string(),
            session_id: None,
            exp: (now + Duration::hours(1)).timestamp() as usize,
            iat: now.timestamp() as usize,
        })
        .unwrap()
}

pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).to_string())
        })
    };

    Response {
        status,
        headers,
        json,
    }
}

/// Starts a session for g1 with lesson l1 and returns its JSON.
pub async fn start_session(app: &Router) -> Value {
    let response = send(
        app,
        "POST",
        "/api/v1/teacher/sessions",
        Some(&teacher_token(TEACHER)),
        Some(serde_json::json!({ "groupId": "g1", "preparedLessonId": "l1" })),
    )
    .await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.json);
    response.json
}

/// Joins and returns (token, session id).
pub async fn join(app: &Router, username: &str, password: &str) -> (String, String) {
    let response = send(
        app,
        "POST",
        "/api/v1/student/join",
        None,
        Some(serde_json::json!({ "username": username, "password": password })),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.json);
    (
        response.json["token"].as_str().unwrap().to_string(),
        response.json["sessionId"].as_str().unwrap().to_string(),
    )
}

pub async fn heartbeat(app: &Router, token: &str, session_id: &str, status: &str) -> Response {
    send(
        app,
        "POST",
        "/api/v1/student/heartbeat",
        Some(token),
        Some(serde_json::json!({ "sessionId": session_id, "status": status })),
    )
    .await
}
