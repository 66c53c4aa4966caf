use axum::{http::StatusCode, response::IntoResponse, Json};
use thiserror::Error;

use crate::sma::SmaError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid pair: {0}")]
    InvalidPair(String),

    #[error("invalid window: {0}")]
    InvalidWindow(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("'from' must be within the last {max_days} days")]
    OutOfRange { max_days: i64 },

    #[error("SMA computation error: {0}")]
    Sma(#[from] SmaError),

    #[error("Candle fetch error: {0}")]
    Fetch(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Stable machine-readable reason code returned to API clients.
    pub fn reason(&self) -> &'static str {
        match self {
            AppError::InvalidPair(_) => "invalid_pair",
            AppError::InvalidWindow(_) => "invalid_window",
            AppError::InvalidTimestamp(_) => "invalid_timestamp",
            AppError::OutOfRange { .. } => "out_of_range",
            AppError::Sma(SmaError::InsufficientHistory { .. }) => "insufficient_history",
            AppError::Sma(SmaError::InvalidSequence(_)) => "invalid_sequence",
            AppError::Fetch(_) | AppError::Http(_) | AppError::Json(_) => "fetch_error",
            AppError::Database(_) | AppError::Migration(_) => "persist_error",
            AppError::Config(_) | AppError::Io(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidPair(_)
            | AppError::InvalidWindow(_)
            | AppError::InvalidTimestamp(_)
            | AppError::OutOfRange { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        // Internal details stay in the logs.
        let (reason, message) = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            ("internal_error", "error processing the request".to_string())
        } else {
            (self.reason(), self.to_string())
        };
        let body = serde_json::json!({ "reason": reason, "message": message });
        (status, Json(body)).into_response()
    }
}
