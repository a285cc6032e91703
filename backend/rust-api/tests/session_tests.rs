use axum::http::StatusCode;
use serde_json::json;

mod common;

use common::{send, start_session, teacher_token, OTHER_TEACHER, TEACHER};

#[tokio::test]
async fn test_start_session_returns_join_password() {
    let app = common::create_test_app().await;

    let session = start_session(&app.router).await;

    assert_eq!(session["groupId"], "g1");
    assert_eq!(session["preparedLessonId"], "l1");
    assert_eq!(session["isActive"], true);
    let password = session["password"].as_str().unwrap();
    assert_eq!(password.len(), 6);
    assert!(password
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
}

#[tokio::test]
async fn test_second_session_for_group_conflicts_until_first_ends() {
    let app = common::create_test_app().await;
    let token = teacher_token(TEACHER);
    let first = start_session(&app.router).await;

    let conflict = send(
        &app.router,
        "POST",
        "/api/v1/teacher/sessions",
        Some(&token),
        Some(json!({ "groupId": "g1", "preparedLessonId": "l1" })),
    )
    .await;
    assert_eq!(conflict.status, StatusCode::CONFLICT);
    assert_eq!(conflict.json["status"], 409);

    let end_uri = format!("/api/v1/teacher/sessions/{}/end", first["id"].as_str().unwrap());
    let ended = send(&app.router, "POST", &end_uri, Some(&token), None).await;
    assert_eq!(ended.status, StatusCode::OK);
    assert_eq!(ended.json["isActive"], false);

    let again = send(&app.router, "POST", &end_uri, Some(&token), None).await;
    assert_eq!(again.status, StatusCode::OK);
    assert_eq!(again.json["endedAt"], ended.json["endedAt"]);

    start_session(&app.router).await;
}

#[tokio::test]
async fn test_start_with_unowned_group_or_lesson_is_bad_request() {
    let app = common::create_test_app().await;
    let token = teacher_token(TEACHER);

    for body in [
        json!({ "groupId": "g2", "preparedLessonId": "l1" }),
        json!({ "groupId": "g1", "preparedLessonId": "l2" }),
        json!({ "groupId": "", "preparedLessonId": "l1" }),
    ] {
        let response = send(
            &app.router,
            "POST",
            "/api/v1/teacher/sessions",
            Some(&token),
            Some(body),
        )
        .await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{}", response.json);
    }
}

#[tokio::test]
async fn test_start_scheduled_class() {
    let app = common::create_test_app().await;
    let token = teacher_token(TEACHER);

    let incomplete = send(
        &app.router,
        "POST",
        "/api/v1/teacher/scheduled-classes/class-no-lesson/start",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(incomplete.status, StatusCode::BAD_REQUEST);

    let started = send(
        &app.router,
        "POST",
        "/api/v1/teacher/scheduled-classes/class-ready/start",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(started.status, StatusCode::CREATED);
    assert_eq!(started.json["scheduledClassId"], "class-ready");

    let missing = send(
        &app.router,
        "POST",
        "/api/v1/teacher/scheduled-classes/nope/start",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_other_teacher_cannot_touch_session() {
    let app = common::create_test_app().await;
    let session = start_session(&app.router).await;
    let session_id = session["id"].as_str().unwrap();
    let other = teacher_token(OTHER_TEACHER);

    let end = send(
        &app.router,
        "POST",
        &format!("/api/v1/teacher/sessions/{}/end", session_id),
        Some(&other),
        None,
    )
    .await;
    assert_eq!(end.status, StatusCode::FORBIDDEN);

    let attendance = send(
        &app.router,
        "GET",
        &format!("/api/v1/teacher/sessions/{}/attendance", session_id),
        Some(&other),
        None,
    )
    .await;
    assert_eq!(attendance.status, StatusCode::FORBIDDEN);

    let missing = send(
        &app.router,
        "POST",
        "/api/v1/teacher/sessions/does-not-exist/end",
        Some(&teacher_token(TEACHER)),
        None,
    )
    .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_teacher_routes_require_teacher_token() {
    let app = common::create_test_app().await;
    let session = start_session(&app.router).await;
    let (student_token, _) =
        common::join(&app.router, "ada", session["password"].as_str().unwrap()).await;

    let anonymous = send(&app.router, "POST", "/api/v1/teacher/sessions", None, None).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    let as_student = send(
        &app.router,
        "POST",
        "/api/v1/teacher/sessions",
        Some(&student_token),
        Some(json!({ "groupId": "g1", "preparedLessonId": "l1" })),
    )
    .await;
    assert_eq!(as_student.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_health_reports_storage_and_disabled_redis() {
    let app = common::create_test_app().await;

    let response = send(&app.router, "GET", "/health", None, None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json["dependencies"]["storage"]["status"], "healthy");
    assert_eq!(response.json["dependencies"]["redis"]["status"], "disabled");
    assert!(response.headers.contains_key("x-trace-id"));
}
