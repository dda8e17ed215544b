//! src/error.rs
//! Engine error types and HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Every fault the engine can surface to its caller.
///
/// Validation faults never touch state; policy faults are rejected with no
/// partial effect; database faults roll back the enclosing transaction.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Event not found")]
    EventNotFound,

    #[error("Prediction not found")]
    PredictionNotFound,

    #[error("User not found")]
    UserNotFound,

    #[error("Predictions are locked for this event; the deadline has passed")]
    AlreadyLocked,

    #[error("A prediction for this event already exists; edit it instead")]
    AlreadySubmitted,

    #[error("This event has already been settled")]
    AlreadySettled,

    #[error("Only the owner may edit a prediction")]
    NotOwner,

    #[error("Invalid ordering: {0}")]
    InvalidOrdering(String),

    #[error("Invalid official result: {0}")]
    InvalidResult(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable error code string for programmatic handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::EventNotFound => "EVENT_NOT_FOUND",
            EngineError::PredictionNotFound => "NOT_FOUND",
            EngineError::UserNotFound => "USER_NOT_FOUND",
            EngineError::AlreadyLocked => "ALREADY_LOCKED",
            EngineError::AlreadySubmitted => "ALREADY_SUBMITTED",
            EngineError::AlreadySettled => "ALREADY_SETTLED",
            EngineError::NotOwner => "NOT_OWNER",
            EngineError::InvalidOrdering(_) => "INVALID_ORDERING",
            EngineError::InvalidResult(_) => "INVALID_RESULT",
            EngineError::Database(_) => "DATABASE_ERROR",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::EventNotFound
            | EngineError::PredictionNotFound
            | EngineError::UserNotFound => StatusCode::NOT_FOUND,
            EngineError::AlreadyLocked => StatusCode::CONFLICT,
            EngineError::AlreadySubmitted => StatusCode::CONFLICT,
            EngineError::AlreadySettled => StatusCode::CONFLICT,
            EngineError::NotOwner => StatusCode::FORBIDDEN,
            EngineError::InvalidOrdering(_) | EngineError::InvalidResult(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            EngineError::Database(_) | EngineError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the underlying database error is a serialization conflict
    /// worth retrying under SERIALIZABLE isolation.
    pub fn is_serialization_conflict(&self) -> bool {
        match self {
            EngineError::Database(e) => {
                let error_str = e.to_string().to_lowercase();
                error_str.contains("serialization failure")
                    || error_str.contains("deadlock")
                    || error_str.contains("could not serialize")
            }
            _ => false,
        }
    }

    /// Whether the underlying database error is a unique-key violation.
    /// Used to turn constraint trips into their policy-fault counterparts.
    pub fn is_unique_violation(e: &sqlx::Error) -> bool {
        match e {
            sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
            _ => false,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error_code = self.error_code(), error = %self, "Internal server error");
        }

        let body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_policy_fault_has_a_distinct_code() {
        let faults = [
            EngineError::EventNotFound,
            EngineError::PredictionNotFound,
            EngineError::UserNotFound,
            EngineError::AlreadyLocked,
            EngineError::AlreadySubmitted,
            EngineError::AlreadySettled,
            EngineError::NotOwner,
            EngineError::InvalidOrdering("x".into()),
            EngineError::InvalidResult("x".into()),
        ];
        let mut codes: Vec<&str> = faults.iter().map(|f| f.error_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), faults.len());
    }

    #[test]
    fn policy_faults_map_to_client_errors() {
        assert!(EngineError::AlreadyLocked.status_code().is_client_error());
        assert!(EngineError::NotOwner.status_code().is_client_error());
        assert!(EngineError::InvalidOrdering("short".into())
            .status_code()
            .is_client_error());
    }
}
