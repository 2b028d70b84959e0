use axum::extract::rejection::JsonRejection;
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::pki::{ErrorCode, IssueError};

/// Error returned to API callers: a fixed code and a human message.
#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
}

impl ApiError {
    pub fn new<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.code,
            message: self.message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<IssueError> for ApiError {
    fn from(err: IssueError) -> Self {
        ApiError::new(err.code(), err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::new(ErrorCode::ParseRequest, rejection.body_text())
    }
}
