use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    response::{IntoResponse, Response},
    Json,
};

use crate::handlers::error::ApiError;

/// JSON body extractor whose rejections use the API's JSON error shape.
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => {
                let message = rejection_message(&rejection);
                tracing::warn!("Rejected request body: {}", message);
                Err(ApiError::bad_request(message).into_response())
            }
        }
    }
}

fn rejection_message(rejection: &JsonRejection) -> String {
    match rejection {
        // Names the offending field, e.g. "status: unknown variant `OFFLINE`".
        JsonRejection::JsonDataError(err) => {
            let detail = std::error::Error::source(err)
                .map(ToString::to_string)
                .unwrap_or_else(|| err.body_text());
            format!("Invalid request fields: {}", detail)
        }
        JsonRejection::JsonSyntaxError(_) => "Request body is not valid JSON".to_string(),
        JsonRejection::MissingJsonContentType(_) => {
            "Expected a JSON body (Content-Type: application/json)".to_string()
        }
        other => other.body_text(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, routing::post, Router};
    use serde::Deserialize;
    use tower::ServiceExt;

    #[derive(Deserialize)]
    #[allow(dead_code)]
    struct HandBody {
        raised: bool,
    }

    async fn hand(AppJson(_): AppJson<HandBody>) -> StatusCode {
        StatusCode::NO_CONTENT
    }

    async fn post_body(content_type: Option<&str>, body: &'static str) -> (StatusCode, String) {
        let mut request = axum::http::Request::builder().method("POST").uri("/hand");
        if let Some(content_type) = content_type {
            request = request.header("content-type", content_type);
        }
        let response = Router::new()
            .route("/hand", post(hand))
            .oneshot(request.body(Body::from(body)).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (
            status,
            json["message"].as_str().unwrap_or_default().to_string(),
        )
    }

    #[tokio::test]
    async fn valid_body_reaches_handler() {
        let (status, _) = post_body(Some("application/json"), r#"{"raised":true}"#).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let (status, message) = post_body(Some("application/json"), r#"{"raised":"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, "Request body is not valid JSON");
    }

    #[tokio::test]
    async fn wrong_field_type_names_the_field() {
        let (status, message) = post_body(Some("application/json"), r#"{"raised":"yes"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(message.starts_with("Invalid request fields:"), "{}", message);
        assert!(message.contains("raised"), "{}", message);
    }

    #[tokio::test]
    async fn missing_content_type_is_bad_request() {
        let (status, message) = post_body(None, r#"{"raised":true}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(message.contains("application/json"), "{}", message);
    }
}
