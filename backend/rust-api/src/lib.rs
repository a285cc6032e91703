use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod client;
pub mod config;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest("/api/v1/student", student_routes(app_state.clone()))
        .nest("/api/v1/teacher", teacher_routes(app_state.clone()))
        .with_state(app_state)
        .layer(cors)
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn student_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    let join_route = Router::new()
        .route("/join", post(handlers::student::join_session))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::rate_limit::join_rate_limit_middleware,
        ));

    // route_layer order: auth runs first, then the guard
    let protected_routes = Router::new()
        .route("/heartbeat", post(handlers::student::heartbeat))
        .route("/hand", post(handlers::student::set_hand))
        .route("/session", get(handlers::student::session_content))
        .route_layer(middleware::from_fn(
            middlewares::auth::student_guard_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::auth::auth_middleware,
        ));

    join_route.merge(protected_routes)
}

fn teacher_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions", post(handlers::teacher::start_session))
        .route(
            "/scheduled-classes/{id}/start",
            post(handlers::teacher::start_scheduled_class),
        )
        .route("/sessions/{id}/end", post(handlers::teacher::end_session))
        .route(
            "/sessions/{id}/attendance",
            get(handlers::teacher::attendance),
        )
        .route(
            "/sessions/{id}/attendance/stream",
            get(handlers::sse::attendance_stream),
        )
        .route(
            "/sessions/{id}/students/{student_id}/activity",
            get(handlers::teacher::student_activity),
        )
        .route(
            "/students/{id}/stats",
            get(handlers::teacher::student_stats),
        )
        .route("/groups/{id}/stats", get(handlers::teacher::group_stats))
        .route_layer(middleware::from_fn(
            middlewares::auth::teacher_guard_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::auth::auth_middleware,
        ))
}
