use async_trait::async_trait;
use shared::domain::{
    CommentEvent, EventId, KindFilter, NewCommentEvent, NewSubmission, ScoreEntry,
    SubmissionId, SubmissionPatch, SubmissionRecord, SubmissionStatus,
};

use crate::error::StorageError;

/// Submission record change applied in the same atomic write as an appended event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RecordChange {
    #[default]
    None,
    Patch(SubmissionPatch),
    /// Replace the author's entry in the score list (one score per admin).
    ReplaceScore(ScoreEntry),
    /// Move the status from `from` to `to`; rejected when the stored status is not `from`.
    Transition {
        from: SubmissionStatus,
        to: SubmissionStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appended {
    pub event: CommentEvent,
    /// Record after the change; `None` when no change was requested or on replay.
    pub record: Option<SubmissionRecord>,
    /// The request id was already stored; nothing was written.
    pub replayed: bool,
}

/// Durable storage for submission records and their comment logs.
///
/// Implementations assign event ids and `server_time` on insert, never
/// physically remove events, and apply an append together with its
/// [`RecordChange`] atomically.
#[async_trait]
pub trait ReviewBackend: Send + Sync + 'static {
    async fn health_check(&self) -> Result<(), StorageError>;

    async fn create_submission(&self, new: NewSubmission)
        -> Result<SubmissionRecord, StorageError>;

    async fn get_submission(&self, id: SubmissionId) -> Result<SubmissionRecord, StorageError>;

    async fn update_submission(
        &self,
        id: SubmissionId,
        patch: SubmissionPatch,
    ) -> Result<SubmissionRecord, StorageError>;

    /// Every append requires an existing submission. Re-appending a stored
    /// `request_id` returns the stored event with `replayed = true`; reusing it
    /// for another submission is rejected.
    async fn append_event(
        &self,
        event: NewCommentEvent,
        change: RecordChange,
    ) -> Result<Appended, StorageError>;

    /// Replaces the content of a live general comment.
    async fn edit_event(
        &self,
        submission_id: SubmissionId,
        event_id: EventId,
        content: &str,
    ) -> Result<CommentEvent, StorageError>;

    /// Returns `false` when the event was already deleted.
    async fn soft_delete_event(
        &self,
        submission_id: SubmissionId,
        event_id: EventId,
    ) -> Result<bool, StorageError>;

    /// Non-deleted events, newest first.
    async fn list_events(
        &self,
        submission_id: SubmissionId,
        filter: KindFilter,
    ) -> Result<Vec<CommentEvent>, StorageError>;
}

/// Computes the record that results from applying `change` to `record`.
pub(crate) fn apply_change(
    mut record: SubmissionRecord,
    change: RecordChange,
) -> Result<SubmissionRecord, StorageError> {
    match change {
        RecordChange::None => {}
        RecordChange::Patch(patch) => patch.apply_to(&mut record),
        RecordChange::ReplaceScore(entry) => {
            let author_id = entry.author_id.clone();
            record.scores = shared::scoring::replace_author_score(&record.scores, &author_id, entry);
        }
        RecordChange::Transition { from, to } => {
            if record.status != from {
                return Err(StorageError::Invalid(format!(
                    "submission {} is {}, not {from}",
                    record.id, record.status
                )));
            }
            record.status = to;
        }
    }
    Ok(record)
}

/// Rejects a replayed request id that belongs to a different submission.
pub(crate) fn check_replay(
    stored: CommentEvent,
    event: &NewCommentEvent,
) -> Result<CommentEvent, StorageError> {
    if stored.submission_id != event.submission_id {
        return Err(StorageError::Invalid(format!(
            "request {} already recorded for submission {}",
            event.request_id, stored.submission_id
        )));
    }
    Ok(stored)
}
