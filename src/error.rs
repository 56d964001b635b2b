use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::{dao::storage::StorageError, state::state_machine::InvalidTransition};

/// Errors that can occur in service layer operations.
///
/// These are local and non-fatal: a rejected buzz or an out-of-phase command
/// surfaces only to the acting client and never rolls back anyone else's view,
/// since no mutation happened.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// A non-host attempted a host-only action.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Action is illegal in the current room/round state.
    #[error("invalid phase: {0}")]
    InvalidPhase(String),
    /// Player already answered incorrectly this round and may not buzz again.
    #[error("round closed for this player")]
    RoundClosedForPlayer,
    /// A winner was already committed for this round.
    #[error("someone already buzzed")]
    AlreadyWon {
        /// Player owning the winning buzz.
        winner_player_id: Uuid,
    },
    /// Reconnection target no longer exists (kicked, or room purged).
    #[error("not a member of this room anymore")]
    NotAMember,
    /// Song catalog is unreachable or has no eligible songs left.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),
    /// Selected song's audio file is missing and the catalog is exhausted.
    #[error("media unavailable: {0}")]
    MediaUnavailable(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(message) => ServiceError::InvalidPhase(message),
            unavailable => ServiceError::Unavailable(unavailable),
        }
    }
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        ServiceError::InvalidPhase(err.to_string())
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Target existed once but is gone; clients should re-enter the join flow.
    #[error("gone: {0}")]
    Gone(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidPhase(message) => AppError::Conflict(message),
            ServiceError::RoundClosedForPlayer => {
                AppError::Conflict("round closed for this player".into())
            }
            ServiceError::AlreadyWon { winner_player_id } => {
                AppError::Conflict(format!("player `{winner_player_id}` already buzzed"))
            }
            ServiceError::NotAMember => AppError::Gone("not a member of this room anymore".into()),
            ServiceError::ResourceUnavailable(message) => AppError::ServiceUnavailable(message),
            ServiceError::MediaUnavailable(message) => AppError::Conflict(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Gone(_) => StatusCode::GONE,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
