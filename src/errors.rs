use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::signing::TokenError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("parcel not found")]
    ParcelNotFound,

    #[error("resident not found")]
    ResidentNotFound,

    #[error("parcel already picked up")]
    AlreadyPickedUp,

    #[error("parcel is not pending")]
    ParcelNotPending,

    #[error("pickup code expired")]
    TokenExpired,

    #[error("invalid pickup code")]
    InvalidToken,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => AppError::TokenExpired,
            TokenError::Tampered | TokenError::Malformed => AppError::InvalidToken,
        }
    }
}

impl AppError {
    /// Machine-checkable code rendered in the error body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ParcelNotFound => "parcel_not_found",
            AppError::ResidentNotFound => "resident_not_found",
            AppError::AlreadyPickedUp => "already_picked_up",
            AppError::ParcelNotPending => "parcel_not_pending",
            AppError::TokenExpired => "token_expired",
            AppError::InvalidToken => "invalid_token",
            AppError::BadRequest(_) => "invalid_request",
            AppError::Database(_) | AppError::Internal(_) => "internal_server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ParcelNotFound | AppError::ResidentNotFound => StatusCode::NOT_FOUND,
            AppError::AlreadyPickedUp => StatusCode::CONFLICT,
            AppError::ParcelNotPending => StatusCode::GONE,
            AppError::TokenExpired => StatusCode::UNAUTHORIZED,
            AppError::InvalidToken | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (error_type, msg) = match &self {
            AppError::ParcelNotFound | AppError::ResidentNotFound => {
                ("not_found_error", self.to_string())
            }
            AppError::AlreadyPickedUp => ("conflict_error", self.to_string()),
            AppError::ParcelNotPending => (
                "precondition_error",
                "parcel has already been picked up; no pickup code can be issued".to_string(),
            ),
            AppError::TokenExpired => ("authentication_error", self.to_string()),
            AppError::InvalidToken => ("authentication_error", self.to_string()),
            AppError::BadRequest(reason) => ("invalid_request_error", reason.clone()),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                ("internal_error", "internal server error".to_string())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                ("internal_error", "internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": self.code(),
            }
        }));

        (self.status(), body).into_response()
    }
}
