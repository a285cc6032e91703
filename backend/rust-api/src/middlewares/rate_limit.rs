use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use redis::aio::ConnectionManager;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::services::AppState;

// Join attempts are password guesses: 10 per 5 minutes per IP
const JOIN_RATE_LIMIT: u32 = 10;
const JOIN_RATE_WINDOW_SECONDS: u64 = 300;

const FIXED_WINDOW_SCRIPT: &str = r#"
    local key = KEYS[1]
    local limit = tonumber(ARGV[1])
    local window = tonumber(ARGV[2])

    local current = redis.call('GET', key)

    if current == false then
        redis.call('SET', key, 1, 'EX', window)
        return 1
    end

    current = tonumber(current)

    if current >= limit then
        return 0
    end

    redis.call('INCR', key)
    return 1
"#;

fn extract_client_ip_from(headers: &HeaderMap, extensions: &axum::http::Extensions) -> String {
    // Preferred order: X-Forwarded-For, Forwarded, X-Real-IP, ConnectInfo
    if let Some(s) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        // comma separated list; the first hop is the client
        return s.split(',').next().unwrap_or(s).trim().to_string();
    }

    if let Some(s) = headers.get("forwarded").and_then(|v| v.to_str().ok()) {
        let client = s
            .split(';')
            .map(str::trim)
            .find_map(|part| part.strip_prefix("for="))
            .map(|value| value.trim().trim_matches('"').to_string());
        if let Some(client) = client {
            return client;
        }
    }

    if let Some(s) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        return s.trim().to_string();
    }

    if let Some(ci) = extensions.get::<ConnectInfo<SocketAddr>>() {
        return ci.0.ip().to_string();
    }

    "unknown".to_string()
}

/// Limits join attempts per client IP. Skipped when Redis is not configured.
pub async fn join_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(redis) = &state.redis else {
        return Ok(next.run(request).await);
    };

    if std::env::var("RATE_LIMIT_DISABLED").unwrap_or_default() == "1" {
        tracing::debug!("Rate limiting disabled via RATE_LIMIT_DISABLED=1");
        return Ok(next.run(request).await);
    }

    let client_ip = extract_client_ip_from(request.headers(), request.extensions());

    let join_limit = std::env::var("RATE_LIMIT_JOIN_ATTEMPTS")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(JOIN_RATE_LIMIT);

    let allowed = check_rate_limit_with_window(
        redis,
        &format!("ratelimit:join:{}", client_ip),
        join_limit,
        JOIN_RATE_WINDOW_SECONDS,
    )
    .await
    .map_err(|e| {
        tracing::error!("Join rate limit check failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    if !allowed {
        tracing::warn!("Join rate limit exceeded for IP: {}", client_ip);
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(request).await)
}

/// Fixed-window counter, checked and bumped atomically in one script.
async fn check_rate_limit_with_window(
    redis: &ConnectionManager,
    key: &str,
    limit: u32,
    window_seconds: u64,
) -> anyhow::Result<bool> {
    let mut conn = redis.clone();

    let allowed: u32 = redis::Script::new(FIXED_WINDOW_SCRIPT)
        .key(key)
        .arg(limit)
        .arg(window_seconds)
        .invoke_async(&mut conn)
        .await?;

    Ok(allowed == 1)
}
