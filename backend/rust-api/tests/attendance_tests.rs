use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use tower::ServiceExt;

mod common;

use common::{heartbeat, join, send, start_session, teacher_token, test_config, TEACHER};

#[tokio::test]
async fn test_join_with_wrong_password_creates_nothing() {
    let app = common::create_test_app().await;
    let session = start_session(&app.router).await;
    let session_id = session["id"].as_str().unwrap();

    let response = send(
        &app.router,
        "POST",
        "/api/v1/student/join",
        None,
        Some(json!({ "username": "ada", "password": "WRONG1" })),
    )
    .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.json["message"], "Invalid username or session password");

    let unknown = send(
        &app.router,
        "POST",
        "/api/v1/student/join",
        None,
        Some(json!({ "username": "nobody", "password": session["password"] })),
    )
    .await;
    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.json["message"], response.json["message"]);

    let attendance = send(
        &app.router,
        "GET",
        &format!("/api/v1/teacher/sessions/{}/attendance", session_id),
        Some(&teacher_token(TEACHER)),
        None,
    )
    .await;
    assert_eq!(attendance.status, StatusCode::OK);
    assert_eq!(attendance.json["students"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_join_code_is_case_insensitive_and_sets_cookie() {
    let app = common::create_test_app().await;
    let session = start_session(&app.router).await;
    let password = session["password"].as_str().unwrap().to_lowercase();

    let response = send(
        &app.router,
        "POST",
        "/api/v1/student/join",
        None,
        Some(json!({ "username": "ada", "password": format!("  {}  ", password) })),
    )
    .await;

    assert_eq!(response.status, StatusCode::OK, "{}", response.json);
    assert_eq!(response.json["sessionId"], session["id"]);
    assert_eq!(response.json["student"]["firstName"], "Ada");
    let cookie = response
        .headers
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(cookie.starts_with("student_session="));
    assert!(cookie.contains("HttpOnly"));
}

#[tokio::test]
async fn test_student_from_other_group_cannot_join() {
    let app = common::create_test_app().await;
    let session = start_session(&app.router).await;

    let response = send(
        &app.router,
        "POST",
        "/api/v1/student/join",
        None,
        Some(json!({ "username": "linus", "password": session["password"] })),
    )
    .await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.json["message"], "Invalid username or session password");
}

#[tokio::test]
async fn test_heartbeat_reports_transitions() {
    let app = common::create_test_app().await;
    let session = start_session(&app.router).await;
    let (token, session_id) = join(&app.router, "ada", session["password"].as_str().unwrap()).await;

    let keepalive = heartbeat(&app.router, &token, &session_id, "ACTIVE").await;
    assert_eq!(keepalive.status, StatusCode::OK);
    assert_eq!(keepalive.json, json!({ "ok": true, "transition": false }));

    let change = heartbeat(&app.router, &token, &session_id, "DISTRACTED").await;
    assert_eq!(change.status, StatusCode::OK);
    assert_eq!(change.json["transition"], true);

    let activity = send(
        &app.router,
        "GET",
        &format!("/api/v1/teacher/sessions/{}/students/st-ada/activity", session_id),
        Some(&teacher_token(TEACHER)),
        None,
    )
    .await;
    assert_eq!(activity.status, StatusCode::OK);
    let entries = activity.json.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["status"], "ACTIVE");
    assert!(entries[0]["duration"].as_i64().unwrap() >= 0);
}

#[tokio::test]
async fn test_heartbeat_validation_and_auth() {
    let app = common::create_test_app().await;
    let session = start_session(&app.router).await;
    let (token, session_id) = join(&app.router, "ada", session["password"].as_str().unwrap()).await;

    let missing_status = send(
        &app.router,
        "POST",
        "/api/v1/student/heartbeat",
        Some(&token),
        Some(json!({ "sessionId": session_id })),
    )
    .await;
    assert_eq!(missing_status.status, StatusCode::BAD_REQUEST);

    let offline = heartbeat(&app.router, &token, &session_id, "OFFLINE").await;
    assert_eq!(offline.status, StatusCode::BAD_REQUEST);

    let other_session = heartbeat(&app.router, &token, "some-other-session", "ACTIVE").await;
    assert_eq!(other_session.status, StatusCode::NOT_FOUND);

    let anonymous = send(
        &app.router,
        "POST",
        "/api/v1/student/heartbeat",
        None,
        Some(json!({ "sessionId": session_id, "status": "ACTIVE" })),
    )
    .await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    let as_teacher = heartbeat(&app.router, &teacher_token(TEACHER), &session_id, "ACTIVE").await;
    assert_eq!(as_teacher.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_heartbeat_accepts_session_cookie() {
    let app = common::create_test_app().await;
    let session = start_session(&app.router).await;
    let (token, session_id) = join(&app.router, "ada", session["password"].as_str().unwrap()).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/student/heartbeat")
        .header("content-type", "application/json")
        .header("cookie", format!("student_session={}", token))
        .body(Body::from(
            json!({ "sessionId": session_id, "status": "IDLE" }).to_string(),
        ))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_attendance_listing_counts_filters_and_sorts() {
    let app = common::create_test_app().await;
    let session = start_session(&app.router).await;
    let password = session["password"].as_str().unwrap();
    let (ada, session_id) = join(&app.router, "ada", password).await;
    let (alan, _) = join(&app.router, "alan", password).await;
    join(&app.router, "grace", password).await;

    heartbeat(&app.router, &ada, &session_id, "IDLE").await;
    heartbeat(&app.router, &alan, &session_id, "DISTRACTED").await;

    let teacher = teacher_token(TEACHER);
    let base = format!("/api/v1/teacher/sessions/{}/attendance", session_id);

    let all = send(&app.router, "GET", &base, Some(&teacher), None).await;
    assert_eq!(all.status, StatusCode::OK);
    assert_eq!(
        all.headers.get(header::CACHE_CONTROL).unwrap(),
        "no-store, no-cache, must-revalidate"
    );
    assert_eq!(
        all.json["counts"],
        json!({ "ACTIVE": 1, "DISTRACTED": 1, "IDLE": 1, "OFFLINE": 0 })
    );
    let names: Vec<&str> = all.json["students"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["student"]["lastName"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Hopper", "Lovelace", "Turing"]);

    let by_priority = send(
        &app.router,
        "GET",
        &format!("{}?sort=priority", base),
        Some(&teacher),
        None,
    )
    .await;
    let statuses: Vec<&str> = by_priority.json["students"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["effectiveStatus"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, vec!["DISTRACTED", "IDLE", "ACTIVE"]);

    let idle_only = send(
        &app.router,
        "GET",
        &format!("{}?status=IDLE", base),
        Some(&teacher),
        None,
    )
    .await;
    let idle = idle_only.json["students"].as_array().unwrap();
    assert_eq!(idle.len(), 1);
    assert_eq!(idle[0]["student"]["username"], "ada");
    assert_eq!(idle_only.json["counts"]["ACTIVE"], 1);
}

#[tokio::test]
async fn test_hand_raise_only_touches_flag() {
    let app = common::create_test_app().await;
    let session = start_session(&app.router).await;
    let (token, session_id) = join(&app.router, "ada", session["password"].as_str().unwrap()).await;
    heartbeat(&app.router, &token, &session_id, "DISTRACTED").await;

    let raised = send(
        &app.router,
        "POST",
        "/api/v1/student/hand",
        Some(&token),
        Some(json!({ "raised": true })),
    )
    .await;
    assert_eq!(raised.status, StatusCode::NO_CONTENT);

    let list = send(
        &app.router,
        "GET",
        &format!("/api/v1/teacher/sessions/{}/attendance", session_id),
        Some(&teacher_token(TEACHER)),
        None,
    )
    .await;
    let row = &list.json["students"][0];
    assert_eq!(row["handRaised"], true);
    assert_eq!(row["currentStatus"], "DISTRACTED");
}

#[tokio::test]
async fn test_session_content_until_teacher_ends_it() {
    let app = common::create_test_app().await;
    let session = start_session(&app.router).await;
    let (token, session_id) = join(&app.router, "ada", session["password"].as_str().unwrap()).await;

    let content = send(&app.router, "GET", "/api/v1/student/session", Some(&token), None).await;
    assert_eq!(content.status, StatusCode::OK);
    assert_eq!(content.json["lesson"]["title"], "Fractions");
    let resources: Vec<&str> = content.json["resources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["resourceId"].as_str().unwrap())
        .collect();
    assert_eq!(resources, vec!["r-video", "r-quiz"]);

    send(
        &app.router,
        "POST",
        &format!("/api/v1/teacher/sessions/{}/end", session_id),
        Some(&teacher_token(TEACHER)),
        None,
    )
    .await;

    let gone = send(&app.router, "GET", "/api/v1/student/session", Some(&token), None).await;
    assert_eq!(gone.status, StatusCode::GONE);
}

async fn read_until<S>(body: &mut S, buffer: &mut String, marker: &str)
where
    S: futures::Stream<Item = Result<axum::body::Bytes, axum::Error>> + Unpin,
{
    while !buffer.contains(marker) {
        let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .unwrap_or_else(|_| panic!("no {:?} frame within 5s, got {:?}", marker, buffer))
            .expect("stream closed early")
            .unwrap();
        buffer.push_str(&String::from_utf8_lossy(&chunk));
    }
}

#[tokio::test]
async fn test_attendance_stream_ends_with_session() {
    let mut config = test_config();
    config.presence.stream_tick_ms = 100;
    let app = common::create_test_app_with(config).await;
    let session = start_session(&app.router).await;
    let session_id = session["id"].as_str().unwrap();
    join(&app.router, "ada", session["password"].as_str().unwrap()).await;

    let request = Request::builder()
        .uri(format!(
            "/api/v1/teacher/sessions/{}/attendance/stream",
            session_id
        ))
        .header("authorization", format!("Bearer {}", teacher_token(TEACHER)))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );

    let mut body = response.into_body().into_data_stream();
    let mut buffer = String::new();
    read_until(&mut body, &mut buffer, "event: attendance").await;
    assert!(buffer.contains("\"ACTIVE\":1"), "{}", buffer);

    let ended = send(
        &app.router,
        "POST",
        &format!("/api/v1/teacher/sessions/{}/end", session_id),
        Some(&teacher_token(TEACHER)),
        None,
    )
    .await;
    assert_eq!(ended.status, StatusCode::OK);

    buffer.clear();
    read_until(&mut body, &mut buffer, "event: session-ended").await;
    assert!(buffer.contains(session_id), "{}", buffer);

    let tail = tokio::time::timeout(Duration::from_secs(5), body.next())
        .await
        .expect("stream did not finish after session ended");
    assert!(tail.is_none());
}
