use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::ScreenerError;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": msg })),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg })),
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<ScreenerError> for ApiError {
    fn from(err: ScreenerError) -> Self {
        match err {
            ScreenerError::NotFound(msg) => ApiError::NotFound(msg),
            ScreenerError::Config(msg) => ApiError::BadRequest(msg),
            ScreenerError::Auth(msg) => ApiError::Unauthorized(msg),
            ScreenerError::UpstreamUnavailable(msg) => ApiError::Unavailable(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screener_errors_map_to_status() {
        let status = |e: ScreenerError| ApiError::from(e).into_response().status();
        assert_eq!(status(ScreenerError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(ScreenerError::Config("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(ScreenerError::Auth("x".into())), StatusCode::UNAUTHORIZED);
        assert_eq!(status(ScreenerError::computation("vol", "x")), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
