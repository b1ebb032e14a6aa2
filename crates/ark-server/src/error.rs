use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

use ark_batch::BatchError;
use ark_fixity::FixityError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Batch(e) => match e {
                BatchError::NotFound(_) => StatusCode::NOT_FOUND,
                BatchError::InvalidState { .. } => StatusCode::CONFLICT,
                BatchError::InsufficientStorage { .. } => StatusCode::INSUFFICIENT_STORAGE,
                BatchError::Duplicate(_) | BatchError::Validation(_) => StatusCode::BAD_REQUEST,
                BatchError::Fixity(FixityError::MissingObject(_)) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Config(_) | Self::Io(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_types::{BatchId, BatchState, SipId};

    #[test]
    fn control_errors_map_to_distinct_statuses() {
        let id = BatchId::new();
        assert_eq!(
            ServerError::from(BatchError::NotFound(id)).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServerError::from(BatchError::InvalidState {
                batch: id,
                state: BatchState::Completed,
                operation: "start",
            })
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServerError::from(BatchError::InsufficientStorage {
                free_bytes: 0,
                required_bytes: 1,
                running: true,
            })
            .status_code(),
            StatusCode::INSUFFICIENT_STORAGE
        );
    }

    #[test]
    fn request_and_internal_errors() {
        let sip = SipId::new("s").unwrap();
        assert_eq!(
            ServerError::from(BatchError::Duplicate(sip.clone())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::from(BatchError::Fixity(FixityError::MissingObject(sip))).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServerError::from(BatchError::Task("boom".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
