//! HTTP error mapping for the ledger API

use crate::error::LedgerError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    /// Shutdown feed is full or closed
    #[error("Service temporarily unavailable")]
    ServiceUnavailable,
}

pub type Result<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Ledger(e) => e.error_code(),
            ApiError::BadRequest { .. } => "LEDGER_BAD_REQUEST",
            ApiError::ServiceUnavailable => "LEDGER_SERVICE_UNAVAILABLE",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Ledger(e) => e.is_retryable(),
            ApiError::BadRequest { .. } => false,
            ApiError::ServiceUnavailable => true,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Ledger(e) => match e {
                LedgerError::Conflict { .. } | LedgerError::PowerRefused { .. } => {
                    StatusCode::CONFLICT
                }
                LedgerError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                LedgerError::BookingNotFound { .. }
                | LedgerError::ExtraMeterNotAttached { .. }
                | LedgerError::MeterNotFound { .. } => StatusCode::NOT_FOUND,
                LedgerError::MeterReadingUnavailable { .. }
                | LedgerError::SerializationConflict { .. } => StatusCode::SERVICE_UNAVAILABLE,
                LedgerError::Database { .. } | LedgerError::Configuration(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
                "timestamp": chrono::Utc::now(),
                "retryable": self.is_retryable(),
            }
        }));

        (status, body).into_response()
    }
}
