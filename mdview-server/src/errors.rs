use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use mdview_core::{PathRejection, WatchError};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Machine-readable reason, present for path rejections.
    pub code: Option<&'static str>,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut error = json!({
            "message": self.message,
            "status": self.status.as_u16(),
        });
        if let Some(code) = self.code {
            error["code"] = json!(code);
        }

        (self.status, Json(json!({ "error": error }))).into_response()
    }
}

impl From<WatchError> for AppError {
    fn from(err: WatchError) -> Self {
        match err {
            WatchError::InvalidPath(rejection) => {
                let message = rejection.to_string();
                let error = match rejection {
                    PathRejection::OutsideRoot => Self::forbidden(message),
                    PathRejection::Empty | PathRejection::WrongExtension => {
                        Self::bad_request(message)
                    }
                };
                error.with_code(rejection.code())
            }
            WatchError::TargetMissing(_) => Self::not_found("File not found"),
            WatchError::SessionsDisabled => {
                Self::not_found("Session watching is not configured")
            }
            WatchError::RegistryClosed => Self::unavailable(err.to_string()),
            other => {
                tracing::error!(error = %other, "watch operation failed");
                Self::internal(other.to_string())
            }
        }
    }
}
