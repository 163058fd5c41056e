use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bell_protocol::{ErrorKind, ErrorPayload};
use serde::Serialize;
use thiserror::Error;

pub type BellResult<T> = Result<T, BellError>;

#[derive(Debug, Error)]
pub enum BellError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    Conflict(String),
    #[error("room {room} is full ({capacity} participants)")]
    Capacity { room: String, capacity: usize },
    #[error("{0}")]
    Configuration(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{event} is not allowed while {state}")]
    InvalidState {
        event: &'static str,
        state: &'static str,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl BellError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) | Self::Capacity { .. } | Self::InvalidState { .. } => {
                StatusCode::CONFLICT
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Configuration(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Capacity { .. } => ErrorKind::Capacity,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to show a client. Server-side faults are logged instead.
    pub fn public_message(&self) -> String {
        match self {
            Self::Configuration(msg) => {
                tracing::error!(error = %msg, "configuration error");
                "server is not configured to issue this credential".into()
            }
            Self::Internal(err) => {
                tracing::error!(error = ?err, "internal error");
                "internal_error".into()
            }
            other => other.to_string(),
        }
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: self.public_message(),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResp {
    pub error: String,
}

impl IntoResponse for BellError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (
            status,
            Json(ErrorResp {
                error: self.public_message(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            BellError::validation("x").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            BellError::Auth("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            BellError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            BellError::Configuration("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            BellError::NotFound("room".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn server_faults_are_not_leaked() {
        let err = BellError::Configuration("MEDIA_API_SECRET missing".into());
        assert!(!err.public_message().contains("MEDIA_API_SECRET"));
        let err = BellError::Internal(anyhow::anyhow!("lock poisoned"));
        assert_eq!(err.payload().message, "internal_error");
        assert_eq!(err.payload().kind, ErrorKind::Internal);
    }

    #[test]
    fn capacity_message_names_room() {
        let err = BellError::Capacity {
            room: "demo".into(),
            capacity: 2,
        };
        assert_eq!(err.to_string(), "room demo is full (2 participants)");
        assert_eq!(err.kind(), ErrorKind::Capacity);
    }
}
