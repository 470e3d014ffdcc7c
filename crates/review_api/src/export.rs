use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{
        AdminId, CommentEvent, CommentKind, EventId, SubmissionRecord, TimeSource,
    },
    scoring::ScoreSummary,
};

/// Self-contained review document for one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionExport {
    pub exported_at: DateTime<Utc>,
    pub submission: SubmissionRecord,
    pub summary: ScoreSummary,
    /// Visible log entries, newest first.
    pub comments: Vec<ExportedComment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedComment {
    pub id: EventId,
    pub kind: CommentKind,
    pub author_id: AdminId,
    pub author_name: String,
    pub created_at: DateTime<Utc>,
    pub time_source: TimeSource,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub is_edited: bool,
}

impl From<&CommentEvent> for ExportedComment {
    fn from(event: &CommentEvent) -> Self {
        Self {
            id: event.id,
            kind: event.kind(),
            author_id: event.author.id.clone(),
            author_name: event.author.name.clone(),
            created_at: event.created_at.instant(),
            time_source: event.created_at.source(),
            content: event.content().into_owned(),
            metadata: event.body.change_metadata(),
            is_edited: event.is_edited,
        }
    }
}
