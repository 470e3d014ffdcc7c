use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use shared::domain::{
    sort_newest_first, CommentEvent, EventBody, EventId, EventTimestamp, KindFilter,
    NewCommentEvent, NewSubmission, SubmissionId, SubmissionPatch, SubmissionRecord,
    SubmissionStatus,
};

use crate::{
    backend::{apply_change, check_replay, Appended, RecordChange, ReviewBackend},
    error::StorageError,
};

#[derive(Default)]
struct MemoryState {
    next_submission_id: i64,
    next_event_id: i64,
    submissions: BTreeMap<SubmissionId, SubmissionRecord>,
    events: BTreeMap<EventId, CommentEvent>,
    request_ids: HashMap<Uuid, EventId>,
}

/// Process-local backend. Used by tests and by `--database-url memory`.
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
    available: AtomicBool,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            available: AtomicBool::new(true),
        }
    }

    /// While unavailable every call fails with [`StorageError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("memory backend is offline".into()))
        }
    }
}

#[async_trait]
impl ReviewBackend for MemoryStorage {
    async fn health_check(&self) -> Result<(), StorageError> {
        self.ensure_available()
    }

    async fn create_submission(
        &self,
        new: NewSubmission,
    ) -> Result<SubmissionRecord, StorageError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        state.next_submission_id += 1;
        let now = Utc::now();
        let record = SubmissionRecord {
            id: SubmissionId(state.next_submission_id),
            title: new.title,
            director_name: new.director_name,
            applicant_email: new.applicant_email,
            category: new.category,
            status: SubmissionStatus::Submitted,
            flagged: false,
            flag_reason: None,
            admin_notes: String::new(),
            scores: Vec::new(),
            submitted_at: now,
            updated_at: now,
        };
        state.submissions.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_submission(&self, id: SubmissionId) -> Result<SubmissionRecord, StorageError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        state
            .submissions
            .get(&id)
            .cloned()
            .ok_or(StorageError::SubmissionNotFound(id))
    }

    async fn update_submission(
        &self,
        id: SubmissionId,
        patch: SubmissionPatch,
    ) -> Result<SubmissionRecord, StorageError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let current = state
            .submissions
            .get(&id)
            .cloned()
            .ok_or(StorageError::SubmissionNotFound(id))?;
        let mut next = apply_change(current, RecordChange::Patch(patch))?;
        next.updated_at = Utc::now();
        state.submissions.insert(id, next.clone());
        Ok(next)
    }

    async fn append_event(
        &self,
        event: NewCommentEvent,
        change: RecordChange,
    ) -> Result<Appended, StorageError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;

        if let Some(existing) = state
            .request_ids
            .get(&event.request_id)
            .and_then(|id| state.events.get(id))
        {
            return Ok(Appended {
                event: check_replay(existing.clone(), &event)?,
                record: None,
                replayed: true,
            });
        }

        let current = state
            .submissions
            .get(&event.submission_id)
            .cloned()
            .ok_or(StorageError::SubmissionNotFound(event.submission_id))?;
        let record = match change {
            RecordChange::None => None,
            change => {
                let mut next = apply_change(current, change)?;
                next.updated_at = Utc::now();
                Some(next)
            }
        };

        state.next_event_id += 1;
        let stored = CommentEvent {
            id: EventId(state.next_event_id),
            submission_id: event.submission_id,
            author: event.author,
            created_at: EventTimestamp {
                server_time: Some(Utc::now()),
                local_fallback: event.local_time,
            },
            updated_at: None,
            is_edited: false,
            is_deleted: false,
            body: event.body,
        };
        state.request_ids.insert(event.request_id, stored.id);
        state.events.insert(stored.id, stored.clone());
        if let Some(record) = &record {
            state.submissions.insert(record.id, record.clone());
        }
        Ok(Appended {
            event: stored,
            record,
            replayed: false,
        })
    }

    async fn edit_event(
        &self,
        submission_id: SubmissionId,
        event_id: EventId,
        content: &str,
    ) -> Result<CommentEvent, StorageError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let event = state
            .events
            .get_mut(&event_id)
            .filter(|e| e.submission_id == submission_id && !e.is_deleted)
            .ok_or(StorageError::EventNotFound {
                submission_id,
                event_id,
            })?;
        match &mut event.body {
            EventBody::General { content: current } => *current = content.to_string(),
            other => {
                return Err(StorageError::Invalid(format!(
                    "only general comments can be edited, event {event_id} is {}",
                    other.kind()
                )))
            }
        }
        event.is_edited = true;
        event.updated_at = Some(Utc::now());
        Ok(event.clone())
    }

    async fn soft_delete_event(
        &self,
        submission_id: SubmissionId,
        event_id: EventId,
    ) -> Result<bool, StorageError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let event = state
            .events
            .get_mut(&event_id)
            .filter(|e| e.submission_id == submission_id)
            .ok_or(StorageError::EventNotFound {
                submission_id,
                event_id,
            })?;
        if event.is_deleted {
            return Ok(false);
        }
        event.is_deleted = true;
        Ok(true)
    }

    async fn list_events(
        &self,
        submission_id: SubmissionId,
        filter: KindFilter,
    ) -> Result<Vec<CommentEvent>, StorageError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        let mut events: Vec<CommentEvent> = state
            .events
            .values()
            .filter(|e| e.submission_id == submission_id && !e.is_deleted)
            .filter(|e| filter.matches(e.kind()))
            .cloned()
            .collect();
        sort_newest_first(&mut events);
        Ok(events)
    }
}

#[cfg(test)]
#[path = "tests/memory_tests.rs"]
mod tests;
