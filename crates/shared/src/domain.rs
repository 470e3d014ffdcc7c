use std::{borrow::Cow, cmp::Ordering, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(SubmissionId);
id_newtype!(EventId);

/// Identifier handed out by the identity provider for an admin account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AdminId(pub String);

impl AdminId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdminId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The signed-in admin performing an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminIdentity {
    pub id: AdminId,
    pub name: String,
    pub email: String,
}

impl AdminIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: AdminId::new(id),
            name: name.into(),
            email: email.into(),
        }
    }
}

/// Author snapshot stored on every event. Never changes after creation.
pub type AuthorRef = AdminIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Draft,
    Submitted,
    UnderReview,
    Shortlisted,
    Accepted,
    Rejected,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Draft => "draft",
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::UnderReview => "under_review",
            SubmissionStatus::Shortlisted => "shortlisted",
            SubmissionStatus::Accepted => "accepted",
            SubmissionStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "draft" => Ok(SubmissionStatus::Draft),
            "submitted" => Ok(SubmissionStatus::Submitted),
            "under_review" => Ok(SubmissionStatus::UnderReview),
            "shortlisted" => Ok(SubmissionStatus::Shortlisted),
            "accepted" => Ok(SubmissionStatus::Accepted),
            "rejected" => Ok(SubmissionStatus::Rejected),
            _ => Err(UnknownValue::new("submission status", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {what}: {value:?}")]
pub struct UnknownValue {
    pub what: &'static str,
    pub value: String,
}

impl UnknownValue {
    fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }
}

/// Five criteria, each 0..=10, and their sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScorePayload {
    pub technical: u8,
    pub story: u8,
    pub creativity: u8,
    pub chiangmai: u8,
    pub human_effort: u8,
    pub total_score: u8,
}

impl ScorePayload {
    /// Builds a payload whose total is computed from the sub-scores.
    pub fn new(technical: u8, story: u8, creativity: u8, chiangmai: u8, human_effort: u8) -> Self {
        let mut payload = Self {
            technical,
            story,
            creativity,
            chiangmai,
            human_effort,
            total_score: 0,
        };
        payload.total_score = crate::scoring::recompute_total(&payload);
        payload
    }

    pub fn criteria(&self) -> [(&'static str, u8); 5] {
        [
            ("technical", self.technical),
            ("story", self.story),
            ("creativity", self.creativity),
            ("chiangmai", self.chiangmai),
            ("humanEffort", self.human_effort),
        ]
    }
}

/// One admin's entry in the submission's authoritative score list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub author_id: AdminId,
    pub author_name: String,
    pub scores: ScorePayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub scored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: SubmissionId,
    pub title: String,
    pub director_name: String,
    pub applicant_email: String,
    pub category: String,
    pub status: SubmissionStatus,
    pub flagged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_reason: Option<String>,
    #[serde(default)]
    pub admin_notes: String,
    #[serde(default)]
    pub scores: Vec<ScoreEntry>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubmission {
    pub title: String,
    pub director_name: String,
    pub applicant_email: String,
    pub category: String,
}

/// Partial update of a submission record. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionPatch {
    #[serde(default)]
    pub status: Option<SubmissionStatus>,
    #[serde(default)]
    pub flagged: Option<bool>,
    /// `Some(None)` clears the stored reason.
    #[serde(default)]
    pub flag_reason: Option<Option<String>>,
    #[serde(default)]
    pub admin_notes: Option<String>,
    #[serde(default)]
    pub scores: Option<Vec<ScoreEntry>>,
}

impl SubmissionPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.flagged.is_none()
            && self.flag_reason.is_none()
            && self.admin_notes.is_none()
            && self.scores.is_none()
    }

    pub fn apply_to(self, record: &mut SubmissionRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(flagged) = self.flagged {
            record.flagged = flagged;
        }
        if let Some(reason) = self.flag_reason {
            record.flag_reason = reason;
        }
        if let Some(notes) = self.admin_notes {
            record.admin_notes = notes;
        }
        if let Some(scores) = self.scores {
            record.scores = scores;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentKind {
    General,
    Scoring,
    StatusChange,
    Flag,
}

impl CommentKind {
    pub const ALL: [CommentKind; 4] = [
        CommentKind::General,
        CommentKind::Scoring,
        CommentKind::StatusChange,
        CommentKind::Flag,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommentKind::General => "general",
            CommentKind::Scoring => "scoring",
            CommentKind::StatusChange => "status_change",
            CommentKind::Flag => "flag",
        }
    }
}

impl fmt::Display for CommentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommentKind {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| UnknownValue::new("comment kind", s))
    }
}

/// Filter accepted by log listings: `all` or a single kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum KindFilter {
    #[default]
    All,
    Only(CommentKind),
}

impl KindFilter {
    pub fn matches(&self, kind: CommentKind) -> bool {
        match self {
            KindFilter::All => true,
            KindFilter::Only(wanted) => *wanted == kind,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KindFilter::All => "all",
            KindFilter::Only(kind) => kind.as_str(),
        }
    }
}

impl FromStr for KindFilter {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() || s.trim() == "all" {
            return Ok(KindFilter::All);
        }
        s.parse::<CommentKind>()
            .map(KindFilter::Only)
            .map_err(|_| UnknownValue::new("comment filter", s))
    }
}

impl Serialize for KindFilter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for KindFilter {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSource {
    Server,
    LocalFallback,
}

/// Creation time of an event. The store fills `server_time` on insert;
/// `local_fallback` is the writer's clock and is always present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTimestamp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_time: Option<DateTime<Utc>>,
    pub local_fallback: DateTime<Utc>,
}

impl EventTimestamp {
    pub fn local(local_fallback: DateTime<Utc>) -> Self {
        Self {
            server_time: None,
            local_fallback,
        }
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.server_time.unwrap_or(self.local_fallback)
    }

    pub fn source(&self) -> TimeSource {
        if self.server_time.is_some() {
            TimeSource::Server
        } else {
            TimeSource::LocalFallback
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventBody {
    General {
        content: String,
    },
    Scoring {
        scores: ScorePayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    StatusChange {
        old_status: SubmissionStatus,
        new_status: SubmissionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Flag {
        flagged: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl EventBody {
    pub fn kind(&self) -> CommentKind {
        match self {
            EventBody::General { .. } => CommentKind::General,
            EventBody::Scoring { .. } => CommentKind::Scoring,
            EventBody::StatusChange { .. } => CommentKind::StatusChange,
            EventBody::Flag { .. } => CommentKind::Flag,
        }
    }

    /// Stored text, or a description synthesized from the payload.
    pub fn content(&self) -> Cow<'_, str> {
        match self {
            EventBody::General { content } => Cow::Borrowed(content),
            EventBody::Scoring {
                content: Some(content),
                ..
            } if !content.trim().is_empty() => Cow::Borrowed(content),
            EventBody::Scoring { scores, .. } => Cow::Owned(format!(
                "Scored {}/{}",
                scores.total_score,
                crate::scoring::MAX_TOTAL
            )),
            EventBody::StatusChange {
                old_status,
                new_status,
                reason,
            } => Cow::Owned(match reason.as_deref().filter(|r| !r.trim().is_empty()) {
                Some(reason) => {
                    format!("Status changed from {old_status} to {new_status}: {reason}")
                }
                None => format!("Status changed from {old_status} to {new_status}"),
            }),
            EventBody::Flag { flagged: true, reason } => {
                Cow::Owned(match reason.as_deref().filter(|r| !r.trim().is_empty()) {
                    Some(reason) => format!("Flagged: {reason}"),
                    None => "Flagged".to_string(),
                })
            }
            EventBody::Flag { flagged: false, .. } => Cow::Borrowed("Flag removed"),
        }
    }

    /// Status and flag metadata as a loose mapping, `None` for other kinds.
    pub fn change_metadata(&self) -> Option<serde_json::Value> {
        match self {
            EventBody::StatusChange {
                old_status,
                new_status,
                reason,
            } => {
                let mut value = serde_json::json!({
                    "oldStatus": old_status,
                    "newStatus": new_status,
                });
                if let Some(reason) = reason {
                    value["reason"] = serde_json::Value::String(reason.clone());
                }
                Some(value)
            }
            EventBody::Flag { flagged, reason } => {
                let mut value = serde_json::json!({ "flagged": flagged });
                if let Some(reason) = reason {
                    value["reason"] = serde_json::Value::String(reason.clone());
                }
                Some(value)
            }
            EventBody::General { .. } | EventBody::Scoring { .. } => None,
        }
    }

    pub fn score_payload(&self) -> Option<&ScorePayload> {
        match self {
            EventBody::Scoring { scores, .. } => Some(scores),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentEvent {
    pub id: EventId,
    pub submission_id: SubmissionId,
    pub author: AuthorRef,
    pub created_at: EventTimestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub is_deleted: bool,
    pub body: EventBody,
}

impl CommentEvent {
    pub fn kind(&self) -> CommentKind {
        self.body.kind()
    }

    pub fn content(&self) -> Cow<'_, str> {
        self.body.content()
    }

    /// Orders by creation instant, then by id. `Greater` means more recent.
    pub fn recency_cmp(&self, other: &CommentEvent) -> Ordering {
        self.created_at
            .instant()
            .cmp(&other.created_at.instant())
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Sorts newest first using [`CommentEvent::recency_cmp`].
pub fn sort_newest_first(events: &mut [CommentEvent]) {
    events.sort_by(|a, b| b.recency_cmp(a));
}

/// An event as submitted by a writer, before the store assigns id and time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCommentEvent {
    /// Writer-chosen key; re-appending the same key returns the stored event.
    pub request_id: Uuid,
    pub submission_id: SubmissionId,
    pub author: AuthorRef,
    pub local_time: DateTime<Utc>,
    pub body: EventBody,
}

impl NewCommentEvent {
    pub fn now(submission_id: SubmissionId, author: AuthorRef, body: EventBody) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            submission_id,
            author,
            local_time: Utc::now(),
            body,
        }
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
