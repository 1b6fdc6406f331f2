//! API error types mapped to HTTP status codes.
//!
//! Each [`ApiError`] variant maps to a specific HTTP status code and produces
//! a JSON response body `{"error": "message", "kind": "..."}`.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use spacevec_core::Error;

/// Application-level error type that implements `IntoResponse`.
///
/// - `NotFound` → 404
/// - `BadRequest` → 400
/// - `Unauthorized` → 401
/// - `Forbidden` → 403
/// - `Conflict` → 409
/// - `ServiceUnavailable` → 503
/// - `Redirect` → 307 (with `Location` header)
/// - `Internal` → 500
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    /// No leader is known yet.
    ServiceUnavailable(String),
    /// Write sent to a follower. Holds the leader's base URL.
    Redirect(String),
    Internal(String),
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "validation",
            ApiError::Unauthorized(_) => "unauthenticated",
            ApiError::Forbidden(_) => "permission_denied",
            ApiError::Conflict(_) => "conflict",
            ApiError::ServiceUnavailable(_) | ApiError::Redirect(_) => "not_leader",
            ApiError::Internal(_) => "io",
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound(_) => ApiError::NotFound(e.to_string()),
            Error::AlreadyExists(_) | Error::Conflict(_) => ApiError::Conflict(e.to_string()),
            Error::Validation(_) => ApiError::BadRequest(e.to_string()),
            Error::PermissionDenied(_) => ApiError::Forbidden(e.to_string()),
            Error::Unauthenticated(_) => ApiError::Unauthorized(e.to_string()),
            Error::NotLeader {
                leader_addr: Some(addr),
                ..
            } => ApiError::Redirect(format!("http://{addr}")),
            Error::NotLeader { .. } => ApiError::ServiceUnavailable(e.to_string()),
            Error::Io(ref msg) => {
                tracing::error!(error = %msg, "Storage failure");
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        match self {
            ApiError::Redirect(location) => match HeaderValue::from_str(&location) {
                Ok(val) => {
                    let body = axum::Json(json!({
                        "error": "not leader",
                        "kind": kind,
                        "redirect": location,
                    }));
                    let mut resp = (StatusCode::TEMPORARY_REDIRECT, body).into_response();
                    resp.headers_mut().insert(header::LOCATION, val);
                    resp
                }
                Err(_) => {
                    let body = axum::Json(json!({ "error": "Invalid redirect location", "kind": "io" }));
                    (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
                }
            },
            other => {
                let (status, message) = match other {
                    ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
                    ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
                    ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
                    ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
                    ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
                    ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
                    ApiError::Internal(msg) | ApiError::Redirect(msg) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, msg)
                    }
                };
                let body = axum::Json(json!({ "error": message, "kind": kind }));
                (status, body).into_response()
            }
        }
    }
}
