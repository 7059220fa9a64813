use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// An error that ends a request, rendered as a JSON body.
#[derive(Debug, Error)]
#[error("{status}: {detail}")]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
    pub path: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    status_code: u16,
    path: &'a str,
}

impl ApiError {
    pub fn bad_request(path: &str, detail: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
            path: path.to_string(),
        }
    }

    pub fn internal(path: &str, detail: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
            path: path.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(path = %self.path, status = %self.status, detail = %self.detail, "request failed");
        } else {
            warn!(path = %self.path, status = %self.status, detail = %self.detail, "request rejected");
        }
        let body = ErrorBody {
            error: &self.detail,
            status_code: self.status.as_u16(),
            path: &self.path,
        };
        (self.status, Json(body)).into_response()
    }
}
