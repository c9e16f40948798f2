use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

use crate::{
    control::ControlError,
    store::StoreError,
};

#[derive(Debug)]
pub enum AppError {
    /// The caller sent something invalid; not worth retrying.
    BadRequest(String),
    /// A dependency (store or broker) is unreachable or slow; retry later.
    Unavailable(String),
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unavailable(msg) => {
                warn!(error = %msg, "Dependency unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            AppError::Internal(e) => {
                error!(error = %e, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        let body = Json(json!({ "status": "error", "message": message }));
        (status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        let unavailable = match &e {
            StoreError::Timeout(_) => true,
            StoreError::Database(db) => is_connection_error(db),
        };
        if unavailable {
            AppError::Unavailable(e.to_string())
        } else {
            AppError::Internal(e.into())
        }
    }
}

/// Errors that say the database cannot be reached right now, as opposed to
/// a bad query or bad data.
fn is_connection_error(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
    )
}

impl From<ControlError> for AppError {
    fn from(e: ControlError) -> Self {
        match e {
            ControlError::UnknownDevice(_) | ControlError::InvalidState(_) => {
                AppError::BadRequest(e.to_string())
            }
            // A store failure here may follow a successful publish.
            ControlError::Publish(_) | ControlError::Store(_) => AppError::Unavailable(e.to_string()),
        }
    }
}
