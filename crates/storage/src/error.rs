use shared::domain::{EventId, SubmissionId};

/// Errors returned by review backends and the comment log store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend could not be reached. The operation must not be assumed applied.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("submission not found: {0}")]
    SubmissionNotFound(SubmissionId),

    /// Missing, or already soft-deleted.
    #[error("event {event_id} not found in submission {submission_id}")]
    EventNotFound {
        submission_id: SubmissionId,
        event_id: EventId,
    },

    /// Rejected before anything was written.
    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::SubmissionNotFound(_) | StorageError::EventNotFound { .. }
        )
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StorageError::Unavailable(err.to_string()),
            other => StorageError::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(format!("corrupt json column: {err}"))
    }
}
