use shared::{
    error::{ApiError, ErrorCode},
    scoring::ScoreError,
};
use storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    /// Retryable; the action was not applied.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Internal(String),
}

impl ReviewError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ReviewError::StorageUnavailable(_) => ErrorCode::StorageUnavailable,
            ReviewError::NotFound(_) => ErrorCode::NotFound,
            ReviewError::Validation(_) => ErrorCode::Validation,
            ReviewError::Forbidden(_) => ErrorCode::Forbidden,
            ReviewError::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl From<StorageError> for ReviewError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unavailable(message) => ReviewError::StorageUnavailable(message),
            StorageError::SubmissionNotFound(_) | StorageError::EventNotFound { .. } => {
                ReviewError::NotFound(err.to_string())
            }
            StorageError::Invalid(message) => ReviewError::Validation(message),
            StorageError::Backend(message) => ReviewError::Internal(message),
        }
    }
}

impl From<ScoreError> for ReviewError {
    fn from(err: ScoreError) -> Self {
        ReviewError::Validation(err.to_string())
    }
}

impl From<ReviewError> for ApiError {
    fn from(err: ReviewError) -> Self {
        ApiError::new(err.code(), err.to_string())
    }
}
