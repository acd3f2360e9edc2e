//! Error types for segcraft-nexus
//!
//! `CraftError` is what the craft pipeline reports for one segment;
//! `ApiError` maps failures onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for fabrication and craft operations
pub type CraftResult<T> = std::result::Result<T, CraftError>;

/// Why a craft attempt did not produce a crafted segment
#[derive(Error, Debug)]
pub enum CraftError {
    /// Chain history cannot be classified (missing choices, gaps, unexpected predecessor state)
    #[error("Cannot classify segment: {0}")]
    Classification(String),

    /// Meme or key filtering eliminated every candidate
    #[error("No compatible candidate: {0}")]
    NoCompatibleCandidate(String),

    /// Library content the chain depends on is absent
    #[error("Missing library content: {0}")]
    MissingContent(String),

    /// The preceding segment has not finished crafting
    #[error("Cannot craft out of order: {0}")]
    OutOfOrder(String),

    /// The stored state no longer matches what this attempt read
    #[error("Optimistic conflict: {0}")]
    OptimisticConflict(String),

    /// Caller lacks the internal privilege crafting requires
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Underlying store failure
    #[error("Persistence error: {0}")]
    Persistence(#[from] segcraft_common::Error),
}

impl CraftError {
    /// Whether the segment must be reverted to Planned after this error
    ///
    /// Conflicts and ordering violations never touched the segment, so there
    /// is nothing to revert.
    pub fn triggers_revert(&self) -> bool {
        matches!(
            self,
            CraftError::Classification(_)
                | CraftError::NoCompatibleCandidate(_)
                | CraftError::MissingContent(_)
                | CraftError::Persistence(_)
        )
    }
}

impl From<sqlx::Error> for CraftError {
    fn from(err: sqlx::Error) -> Self {
        CraftError::Persistence(segcraft_common::Error::Database(err))
    }
}

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] segcraft_common::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// API result type
pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Database(segcraft_common::Error::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
