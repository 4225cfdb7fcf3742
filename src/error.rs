//! Service-level errors and their HTTP mapping.

use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use uuid::Uuid;

use crate::db::StoreError;
use crate::email::EmailError;
use crate::models::RequestStatus;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("prayer request {0} not found")]
    NotFound(Uuid),
    #[error("cannot move a request from {from} to {to}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },
    #[error("{0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(StoreError),
    #[error(transparent)]
    Email(#[from] EmailError),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => AppError::NotFound(id),
            StoreError::ReplyInFlight(id) => {
                AppError::Conflict(format!("a reply to request {id} is already in flight"))
            }
            StoreError::NotReplyable { status, .. } => AppError::InvalidTransition {
                from: status,
                to: RequestStatus::Replied,
            },
            other => AppError::Storage(other),
        }
    }
}

// Extractor failures keep the `{"error": ...}` envelope.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidTransition { .. } | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Email(e) => match e {
                EmailError::Address(_) => StatusCode::BAD_REQUEST,
                EmailError::Send(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        if code.is_server_error() {
            tracing::error!("{}", self);
        }
        (code, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
