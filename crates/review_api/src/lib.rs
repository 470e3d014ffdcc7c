//! Review actions on submissions: comments, scores, status, flags and notes.
//!
//! Every action goes through the [`CommentLogStore`] and reports its outcome
//! to the configured [`Notifier`].

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared::{
    domain::{
        AdminId, AdminIdentity, CommentEvent, CommentKind, EventBody, EventId, KindFilter,
        NewCommentEvent, ScoreEntry, ScorePayload, SubmissionId, SubmissionPatch,
        SubmissionRecord, SubmissionStatus,
    },
    protocol::ScoreInput,
    scoring::{
        latest_score_by_author, score_drift, summarize, validate_scores, ScoreDrift, ScoreError,
        ScoreSummary, MAX_CRITERION,
    },
};
use storage::{CommentLogStore, RecordChange, Subscription};
use tracing::debug;

mod error;
mod export;
mod notify;
mod policy;

pub use error::ReviewError;
pub use export::{ExportedComment, SubmissionExport};
pub use notify::{Notice, NoticeLevel, Notifier, RecordingNotifier, TracingNotifier};
pub use policy::{AllowAll, ScoringPolicy, ScoringRoster};

#[derive(Clone)]
pub struct ReviewContext {
    pub store: CommentLogStore,
    pub policy: Arc<dyn ScoringPolicy>,
    pub notifier: Arc<dyn Notifier>,
}

impl ReviewContext {
    /// Anyone may score; notices go to the log.
    pub fn new(store: CommentLogStore) -> Self {
        Self {
            store,
            policy: Arc::new(AllowAll),
            notifier: Arc::new(TracingNotifier),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn ScoringPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    fn report<T>(
        &self,
        title: &str,
        success: &str,
        result: Result<T, ReviewError>,
    ) -> Result<T, ReviewError> {
        match &result {
            Ok(_) => self.notifier.notify(Notice::success(title, success)),
            Err(err) => self.notifier.notify(Notice::error(title, err.to_string())),
        }
        result
    }
}

/// Record and event produced by an action that changes the submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewUpdate {
    pub event: CommentEvent,
    pub record: SubmissionRecord,
}

pub async fn get_submission(
    ctx: &ReviewContext,
    submission_id: SubmissionId,
) -> Result<SubmissionRecord, ReviewError> {
    Ok(ctx.store.get_submission(submission_id).await?)
}

pub async fn list_comments(
    ctx: &ReviewContext,
    submission_id: SubmissionId,
    filter: KindFilter,
) -> Result<Vec<CommentEvent>, ReviewError> {
    ctx.store.get_submission(submission_id).await?;
    Ok(ctx.store.list(submission_id, filter).await?)
}

pub async fn add_comment(
    ctx: &ReviewContext,
    submission_id: SubmissionId,
    admin: AdminIdentity,
    content: &str,
) -> Result<CommentEvent, ReviewError> {
    let result: Result<CommentEvent, ReviewError> = async {
        let content = content.trim();
        if content.is_empty() {
            return Err(ReviewError::Validation("comment cannot be empty".into()));
        }
        ctx.store.get_submission(submission_id).await?;
        let event = NewCommentEvent::now(
            submission_id,
            admin,
            EventBody::General {
                content: content.to_string(),
            },
        );
        Ok(ctx.store.append(event).await?)
    }
    .await;
    ctx.report("Comment", "Comment added", result)
}

pub async fn edit_comment(
    ctx: &ReviewContext,
    submission_id: SubmissionId,
    event_id: EventId,
    admin: &AdminIdentity,
    content: &str,
) -> Result<CommentEvent, ReviewError> {
    let result: Result<CommentEvent, ReviewError> = async {
        let current = visible_event(ctx, submission_id, event_id)
            .await?
            .ok_or_else(|| {
                ReviewError::NotFound(format!(
                    "comment {event_id} not found in submission {submission_id}"
                ))
            })?;
        ensure_author(&current, admin)?;
        Ok(ctx.store.edit(submission_id, event_id, content.trim()).await?)
    }
    .await;
    ctx.report("Comment", "Comment updated", result)
}

/// Deleting an already deleted comment succeeds. Scoring, status and flag
/// events are history backing the submission record and cannot be deleted.
pub async fn delete_comment(
    ctx: &ReviewContext,
    submission_id: SubmissionId,
    event_id: EventId,
    admin: &AdminIdentity,
) -> Result<(), ReviewError> {
    let result: Result<(), ReviewError> = async {
        if let Some(current) = visible_event(ctx, submission_id, event_id).await? {
            ensure_author(&current, admin)?;
            if current.kind() != CommentKind::General {
                return Err(ReviewError::Validation(format!(
                    "{} events cannot be deleted",
                    current.kind()
                )));
            }
        }
        Ok(ctx.store.soft_delete(submission_id, event_id).await?)
    }
    .await;
    ctx.report("Comment", "Comment deleted", result)
}

/// Validates the criteria, appends a scoring event and replaces the admin's
/// entry in the score list in the same write.
pub async fn submit_score(
    ctx: &ReviewContext,
    submission_id: SubmissionId,
    admin: AdminIdentity,
    input: ScoreInput,
    comment: Option<String>,
) -> Result<ReviewUpdate, ReviewError> {
    let result: Result<ReviewUpdate, ReviewError> = async {
        if !ctx.policy.can_score(&admin) {
            return Err(ReviewError::Forbidden(format!(
                "{} is not allowed to score submissions",
                admin.id
            )));
        }
        let scores = score_payload(input)?;
        let comment = comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        let entry = ScoreEntry {
            author_id: admin.id.clone(),
            author_name: admin.name.clone(),
            scores,
            comment: comment.clone(),
            scored_at: Utc::now(),
        };
        let event = NewCommentEvent::now(
            submission_id,
            admin,
            EventBody::Scoring {
                scores,
                content: comment,
            },
        );
        let appended = ctx
            .store
            .append_with_change(event, RecordChange::ReplaceScore(entry))
            .await?;
        finish_update(ctx, appended.event, appended.record).await
    }
    .await;
    ctx.report("Score", "Score saved", result)
}

pub async fn change_status(
    ctx: &ReviewContext,
    submission_id: SubmissionId,
    admin: AdminIdentity,
    new_status: SubmissionStatus,
    reason: Option<String>,
) -> Result<ReviewUpdate, ReviewError> {
    let result: Result<ReviewUpdate, ReviewError> = async {
        let current = ctx.store.get_submission(submission_id).await?;
        if current.status == new_status {
            return Err(ReviewError::Validation(format!(
                "submission is already {new_status}"
            )));
        }
        let event = NewCommentEvent::now(
            submission_id,
            admin,
            EventBody::StatusChange {
                old_status: current.status,
                new_status,
                reason: non_blank(reason),
            },
        );
        let transition = RecordChange::Transition {
            from: current.status,
            to: new_status,
        };
        let appended = ctx.store.append_with_change(event, transition).await?;
        finish_update(ctx, appended.event, appended.record).await
    }
    .await;
    ctx.report("Status", &format!("Status changed to {new_status}"), result)
}

/// Setting `flagged = false` also clears the stored reason.
pub async fn set_flag(
    ctx: &ReviewContext,
    submission_id: SubmissionId,
    admin: AdminIdentity,
    flagged: bool,
    reason: Option<String>,
) -> Result<ReviewUpdate, ReviewError> {
    let result: Result<ReviewUpdate, ReviewError> = async {
        let reason = if flagged { non_blank(reason) } else { None };
        let event = NewCommentEvent::now(
            submission_id,
            admin,
            EventBody::Flag {
                flagged,
                reason: reason.clone(),
            },
        );
        let patch = SubmissionPatch {
            flagged: Some(flagged),
            flag_reason: Some(reason),
            ..SubmissionPatch::default()
        };
        let appended = ctx
            .store
            .append_with_change(event, RecordChange::Patch(patch))
            .await?;
        finish_update(ctx, appended.event, appended.record).await
    }
    .await;
    let success = if flagged { "Submission flagged" } else { "Flag removed" };
    ctx.report("Flag", success, result)
}

/// Notes are part of the record only; they do not enter the comment log.
pub async fn update_notes(
    ctx: &ReviewContext,
    submission_id: SubmissionId,
    admin: &AdminIdentity,
    notes: &str,
) -> Result<SubmissionRecord, ReviewError> {
    let result: Result<SubmissionRecord, ReviewError> = async {
        let patch = SubmissionPatch {
            admin_notes: Some(notes.to_string()),
            ..SubmissionPatch::default()
        };
        let record = ctx.store.update_submission(submission_id, patch).await?;
        debug!(%submission_id, admin_id = %admin.id, "admin notes updated");
        Ok(record)
    }
    .await;
    ctx.report("Notes", "Notes saved", result)
}

/// The admin's latest non-deleted score from the log, used to prefill the form.
pub async fn my_latest_score(
    ctx: &ReviewContext,
    submission_id: SubmissionId,
    admin_id: &AdminId,
) -> Result<Option<ScorePayload>, ReviewError> {
    let events = list_comments(ctx, submission_id, KindFilter::Only(CommentKind::Scoring)).await?;
    Ok(latest_score_by_author(&events, admin_id).copied())
}

/// Aggregates over the submission's score list.
pub async fn score_summary(
    ctx: &ReviewContext,
    submission_id: SubmissionId,
) -> Result<ScoreSummary, ReviewError> {
    let record = ctx.store.get_submission(submission_id).await?;
    Ok(summarize(&record.scores))
}

/// Differences between the score list and the log's latest scoring events.
pub async fn check_score_drift(
    ctx: &ReviewContext,
    submission_id: SubmissionId,
) -> Result<Vec<ScoreDrift>, ReviewError> {
    let record = ctx.store.get_submission(submission_id).await?;
    let events = ctx
        .store
        .list(submission_id, KindFilter::Only(CommentKind::Scoring))
        .await?;
    Ok(score_drift(&events, &record.scores))
}

pub async fn export_submission(
    ctx: &ReviewContext,
    submission_id: SubmissionId,
) -> Result<SubmissionExport, ReviewError> {
    let result: Result<SubmissionExport, ReviewError> = async {
        let submission = ctx.store.get_submission(submission_id).await?;
        let events = ctx.store.list(submission_id, KindFilter::All).await?;
        Ok(SubmissionExport {
            exported_at: Utc::now(),
            summary: summarize(&submission.scores),
            comments: events.iter().map(ExportedComment::from).collect(),
            submission,
        })
    }
    .await;
    ctx.report("Export", "Review exported", result)
}

pub fn subscribe<F>(ctx: &ReviewContext, submission_id: SubmissionId, on_update: F) -> Subscription
where
    F: FnMut(Vec<CommentEvent>) + Send + 'static,
{
    ctx.store.subscribe(submission_id, on_update)
}

fn score_payload(input: ScoreInput) -> Result<ScorePayload, ScoreError> {
    let scores = ScorePayload::new(
        criterion("technical", input.technical)?,
        criterion("story", input.story)?,
        criterion("creativity", input.creativity)?,
        criterion("chiangmai", input.chiangmai)?,
        criterion("humanEffort", input.human_effort)?,
    );
    validate_scores(&scores)?;
    if let Some(supplied) = input.total_score {
        if supplied != i64::from(scores.total_score) {
            return Err(ScoreError::TotalMismatch {
                supplied,
                computed: scores.total_score,
            });
        }
    }
    Ok(scores)
}

fn criterion(criterion: &'static str, value: i64) -> Result<u8, ScoreError> {
    u8::try_from(value)
        .ok()
        .filter(|v| *v <= MAX_CRITERION)
        .ok_or(ScoreError::OutOfRange { criterion, value })
}

async fn visible_event(
    ctx: &ReviewContext,
    submission_id: SubmissionId,
    event_id: EventId,
) -> Result<Option<CommentEvent>, ReviewError> {
    let events = ctx.store.list(submission_id, KindFilter::All).await?;
    Ok(events.into_iter().find(|e| e.id == event_id))
}

fn ensure_author(event: &CommentEvent, admin: &AdminIdentity) -> Result<(), ReviewError> {
    if event.author.id != admin.id {
        return Err(ReviewError::Forbidden(
            "only the author can change this comment".into(),
        ));
    }
    Ok(())
}

async fn finish_update(
    ctx: &ReviewContext,
    event: CommentEvent,
    record: Option<SubmissionRecord>,
) -> Result<ReviewUpdate, ReviewError> {
    // A replayed append carries no record.
    let record = match record {
        Some(record) => record,
        None => ctx.store.get_submission(event.submission_id).await?,
    };
    Ok(ReviewUpdate { event, record })
}

fn non_blank(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
