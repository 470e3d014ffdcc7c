use serde::{Deserialize, Serialize};

use crate::{
    domain::{AdminIdentity, CommentEvent, KindFilter, SubmissionId, SubmissionStatus},
    error::ApiError,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddCommentRequest {
    pub admin: AdminIdentity,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditCommentRequest {
    pub admin: AdminIdentity,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteCommentRequest {
    pub admin: AdminIdentity,
}

/// Criteria as entered on the scoring form. A supplied total is checked, never trusted.
///
/// Fields are wider than the stored criteria so any integer the form sends
/// reaches range validation instead of failing to deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreInput {
    pub technical: i64,
    pub story: i64,
    pub creativity: i64,
    pub chiangmai: i64,
    pub human_effort: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_score: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitScoreRequest {
    pub admin: AdminIdentity,
    pub scores: ScoreInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeStatusRequest {
    pub admin: AdminIdentity,
    pub new_status: SubmissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetFlagRequest {
    pub admin: AdminIdentity,
    pub flagged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateNotesRequest {
    pub admin: AdminIdentity,
    pub notes: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListCommentsQuery {
    #[serde(default)]
    pub filter: KindFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Full visible log of a submission, newest first.
    CommentsSnapshot {
        submission_id: SubmissionId,
        events: Vec<CommentEvent>,
    },
    Error(ApiError),
}
