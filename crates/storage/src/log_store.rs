use std::sync::{Arc, Mutex, MutexGuard};

use tokio::{
    sync::broadcast::{self, error::RecvError, error::TryRecvError},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use shared::{
    domain::{
        CommentEvent, EventBody, EventId, KindFilter, NewCommentEvent, NewSubmission,
        SubmissionId, SubmissionPatch, SubmissionRecord,
    },
    scoring::validate_scores,
};

use crate::{
    backend::{Appended, RecordChange, ReviewBackend},
    error::StorageError,
};

pub const DEFAULT_FEED_CAPACITY: usize = 256;

type UpdateFn = Box<dyn FnMut(Vec<CommentEvent>) + Send>;

/// Handle over a backend that owns the per-submission comment logs and
/// fans changes out to live subscriptions. Clones share the same feed.
#[derive(Clone)]
pub struct CommentLogStore {
    backend: Arc<dyn ReviewBackend>,
    changes: broadcast::Sender<SubmissionId>,
}

impl CommentLogStore {
    pub fn new(backend: Arc<dyn ReviewBackend>) -> Self {
        Self::with_capacity(backend, DEFAULT_FEED_CAPACITY)
    }

    pub fn with_capacity(backend: Arc<dyn ReviewBackend>, capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self { backend, changes }
    }

    pub async fn health_check(&self) -> Result<(), StorageError> {
        self.backend.health_check().await
    }

    pub async fn create_submission(
        &self,
        new: NewSubmission,
    ) -> Result<SubmissionRecord, StorageError> {
        let record = self.backend.create_submission(new).await?;
        info!(submission_id = %record.id, title = %record.title, "submission created");
        Ok(record)
    }

    pub async fn get_submission(&self, id: SubmissionId) -> Result<SubmissionRecord, StorageError> {
        self.backend.get_submission(id).await
    }

    pub async fn update_submission(
        &self,
        id: SubmissionId,
        patch: SubmissionPatch,
    ) -> Result<SubmissionRecord, StorageError> {
        self.backend.update_submission(id, patch).await
    }

    pub async fn append(&self, event: NewCommentEvent) -> Result<CommentEvent, StorageError> {
        self.append_with_change(event, RecordChange::None)
            .await
            .map(|appended| appended.event)
    }

    /// Appends `event` and applies `change` to its submission in one write.
    pub async fn append_with_change(
        &self,
        event: NewCommentEvent,
        change: RecordChange,
    ) -> Result<Appended, StorageError> {
        validate_new_event(&event)?;
        let submission_id = event.submission_id;
        let appended = self.backend.append_event(event, change).await?;
        if appended.replayed {
            debug!(%submission_id, event_id = %appended.event.id, "append was a replay");
        } else {
            info!(
                %submission_id,
                event_id = %appended.event.id,
                kind = %appended.event.kind(),
                author_id = %appended.event.author.id,
                "comment event appended"
            );
            self.notify(submission_id);
        }
        Ok(appended)
    }

    /// Replaces the content of a live general comment. Authorship is the caller's check.
    pub async fn edit(
        &self,
        submission_id: SubmissionId,
        event_id: EventId,
        new_content: &str,
    ) -> Result<CommentEvent, StorageError> {
        if new_content.trim().is_empty() {
            return Err(StorageError::Invalid("comment content cannot be empty".into()));
        }
        let edited = self
            .backend
            .edit_event(submission_id, event_id, new_content)
            .await?;
        info!(%submission_id, %event_id, "comment edited");
        self.notify(submission_id);
        Ok(edited)
    }

    /// Idempotent: deleting an already deleted event succeeds without side effects.
    pub async fn soft_delete(
        &self,
        submission_id: SubmissionId,
        event_id: EventId,
    ) -> Result<(), StorageError> {
        if self
            .backend
            .soft_delete_event(submission_id, event_id)
            .await?
        {
            info!(%submission_id, %event_id, "comment soft-deleted");
            self.notify(submission_id);
        }
        Ok(())
    }

    pub async fn list(
        &self,
        submission_id: SubmissionId,
        filter: KindFilter,
    ) -> Result<Vec<CommentEvent>, StorageError> {
        self.backend.list_events(submission_id, filter).await
    }

    /// Asks every live subscription of the submission to re-deliver its full
    /// set, e.g. after writes made by another process on the same database.
    pub fn resync(&self, submission_id: SubmissionId) {
        self.notify(submission_id);
    }

    /// Delivers the current visible log now and again after every change.
    ///
    /// Deliveries for one subscription never overlap. A failed re-list ends
    /// the subscription with one empty delivery. `on_update` must not drop
    /// its own [`Subscription`].
    pub fn subscribe<F>(&self, submission_id: SubmissionId, on_update: F) -> Subscription
    where
        F: FnMut(Vec<CommentEvent>) + Send + 'static,
    {
        let slot = CallbackSlot(Arc::new(Mutex::new(Some(Box::new(on_update)))));
        let mut changes = self.changes.subscribe();
        let store = self.clone();
        let task_slot = slot.clone();

        let task = tokio::spawn(async move {
            if !store.deliver(submission_id, &task_slot).await {
                return;
            }
            loop {
                let refresh = match changes.recv().await {
                    Ok(changed) => changed == submission_id,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(%submission_id, skipped, "comment feed lagged, resyncing");
                        true
                    }
                    Err(RecvError::Closed) => break,
                };
                if !refresh {
                    continue;
                }
                // Coalesce a burst of changes into one delivery.
                loop {
                    match changes.try_recv() {
                        Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                        Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                    }
                }
                if !store.deliver(submission_id, &task_slot).await {
                    break;
                }
            }
            debug!(%submission_id, "comment subscription ended");
        });

        Subscription {
            submission_id,
            slot,
            task,
        }
    }

    fn notify(&self, submission_id: SubmissionId) {
        // No receivers just means nobody is subscribed.
        let _ = self.changes.send(submission_id);
    }

    async fn deliver(&self, submission_id: SubmissionId, slot: &CallbackSlot) -> bool {
        match self.list(submission_id, KindFilter::All).await {
            Ok(events) => slot.call(events),
            Err(error) => {
                warn!(%submission_id, %error, "comment subscription failed, delivering empty log");
                slot.call(Vec::new());
                slot.clear();
                false
            }
        }
    }
}

fn validate_new_event(event: &NewCommentEvent) -> Result<(), StorageError> {
    match &event.body {
        EventBody::General { content } if content.trim().is_empty() => Err(
            StorageError::Invalid("general comment content cannot be empty".into()),
        ),
        EventBody::Scoring { scores, .. } => {
            validate_scores(scores).map_err(|e| StorageError::Invalid(e.to_string()))
        }
        _ => Ok(()),
    }
}

#[derive(Clone)]
struct CallbackSlot(Arc<Mutex<Option<UpdateFn>>>);

impl CallbackSlot {
    fn lock(&self) -> MutexGuard<'_, Option<UpdateFn>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns `false` once the subscription has been cancelled.
    fn call(&self, events: Vec<CommentEvent>) -> bool {
        match self.lock().as_mut() {
            Some(on_update) => {
                on_update(events);
                true
            }
            None => false,
        }
    }

    fn clear(&self) {
        self.lock().take();
    }
}

/// Live view returned by [`CommentLogStore::subscribe`]. Dropping it unsubscribes.
pub struct Subscription {
    submission_id: SubmissionId,
    slot: CallbackSlot,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn submission_id(&self) -> SubmissionId {
        self.submission_id
    }

    /// `false` once the subscription ended on its own after a failure.
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// After this returns `on_update` is never called again.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
        // Waits for an in-flight delivery before releasing the callback.
        self.slot.clear();
    }
}

#[cfg(test)]
#[path = "tests/log_store_tests.rs"]
mod tests;
