use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite, SqliteConnection,
};
use tracing::debug;

use shared::domain::{
    AdminIdentity, CommentEvent, EventBody, EventId, EventTimestamp, KindFilter,
    NewCommentEvent, NewSubmission, SubmissionId, SubmissionPatch, SubmissionRecord,
    SubmissionStatus,
};

use crate::{
    backend::{apply_change, check_replay, Appended, RecordChange, ReviewBackend},
    error::StorageError,
};

const EVENT_COLUMNS: &str = "id, submission_id, author_id, author_name, author_email, body_json, \
     server_time_us, local_time_us, updated_at_us, is_edited, is_deleted";

const SUBMISSION_COLUMNS: &str = "id, title, director_name, applicant_email, category, status, \
     flagged, flag_reason, admin_notes, scores_json, submitted_at_us, updated_at_us";

#[derive(Clone)]
pub struct SqliteStorage {
    pool: Pool<Sqlite>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid sqlite url '{database_url}'"))?
            .create_if_missing(true);
        // Shared-cache memory databases raise table locks across connections.
        let max_connections = if database_url.starts_with("sqlite::memory:") {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open sqlite database '{database_url}'"))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run review log migrations")?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl ReviewBackend for SqliteStorage {
    async fn health_check(&self) -> Result<(), StorageError> {
        let _: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn create_submission(
        &self,
        new: NewSubmission,
    ) -> Result<SubmissionRecord, StorageError> {
        let now = micros(Utc::now());
        let row = sqlx::query(
            "INSERT INTO submissions
                (title, director_name, applicant_email, category, status, submitted_at_us, updated_at_us)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&new.title)
        .bind(&new.director_name)
        .bind(&new.applicant_email)
        .bind(&new.category)
        .bind(SubmissionStatus::Submitted.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        let id = SubmissionId(row.try_get::<i64, _>(0)?);
        let mut conn = self.pool.acquire().await?;
        load_submission(&mut conn, id).await
    }

    async fn get_submission(&self, id: SubmissionId) -> Result<SubmissionRecord, StorageError> {
        let mut conn = self.pool.acquire().await?;
        load_submission(&mut conn, id).await
    }

    async fn update_submission(
        &self,
        id: SubmissionId,
        patch: SubmissionPatch,
    ) -> Result<SubmissionRecord, StorageError> {
        let mut tx = self.pool.begin().await?;
        let current = load_submission(&mut tx, id).await?;
        let next = apply_change(current, RecordChange::Patch(patch))?;
        let next = store_submission(&mut tx, next).await?;
        tx.commit().await?;
        Ok(next)
    }

    async fn append_event(
        &self,
        event: NewCommentEvent,
        change: RecordChange,
    ) -> Result<Appended, StorageError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM comment_events WHERE request_id = ?"
        ))
        .bind(event.request_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = existing {
            debug!(request_id = %event.request_id, "append replayed an existing event");
            return Ok(Appended {
                event: check_replay(event_from_row(&row)?, &event)?,
                record: None,
                replayed: true,
            });
        }

        let current = load_submission(&mut tx, event.submission_id).await?;
        let next = match change {
            RecordChange::None => None,
            change => Some(apply_change(current, change)?),
        };

        let server_time = micros(Utc::now());
        let row = sqlx::query(
            "INSERT INTO comment_events
                (request_id, submission_id, author_id, author_name, author_email, kind, body_json,
                 server_time_us, local_time_us)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(event.request_id.to_string())
        .bind(event.submission_id.0)
        .bind(event.author.id.as_str())
        .bind(&event.author.name)
        .bind(&event.author.email)
        .bind(event.body.kind().as_str())
        .bind(serde_json::to_string(&event.body)?)
        .bind(server_time)
        .bind(micros(event.local_time))
        .fetch_one(&mut *tx)
        .await?;
        let event_id = EventId(row.try_get::<i64, _>(0)?);

        let record = match next {
            Some(next) => Some(store_submission(&mut tx, next).await?),
            None => None,
        };

        let stored = load_event(&mut tx, event.submission_id, event_id)
            .await?
            .ok_or(StorageError::EventNotFound {
                submission_id: event.submission_id,
                event_id,
            })?;
        tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;
        let current = load_event(&mut tx, submission_id, event_id)
            .await?
            .filter(|e| !e.is_deleted)
            .ok_or(StorageError::EventNotFound {
                submission_id,
                event_id,
            })?;
        if !matches!(current.body, EventBody::General { .. }) {
            return Err(StorageError::Invalid(format!(
                "only general comments can be edited, event {event_id} is {}",
                current.kind()
            )));
        }

        let body = EventBody::General {
            content: content.to_string(),
        };
        sqlx::query(
            "UPDATE comment_events
             SET body_json = ?, is_edited = 1, updated_at_us = ?
             WHERE id = ? AND submission_id = ?",
        )
        .bind(serde_json::to_string(&body)?)
        .bind(micros(Utc::now()))
        .bind(event_id.0)
        .bind(submission_id.0)
        .execute(&mut *tx)
        .await?;

        let edited = load_event(&mut tx, submission_id, event_id)
            .await?
            .ok_or(StorageError::EventNotFound {
                submission_id,
                event_id,
            })?;
        tx.commit().await?;
        Ok(edited)
    }

    async fn soft_delete_event(
        &self,
        submission_id: SubmissionId,
        event_id: EventId,
    ) -> Result<bool, StorageError> {
        let changed = sqlx::query(
            "UPDATE comment_events SET is_deleted = 1
             WHERE id = ? AND submission_id = ? AND is_deleted = 0",
        )
        .bind(event_id.0)
        .bind(submission_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if changed > 0 {
            return Ok(true);
        }

        let exists: Option<i64> =
            sqlx::query_scalar("SELECT id FROM comment_events WHERE id = ? AND submission_id = ?")
                .bind(event_id.0)
                .bind(submission_id.0)
                .fetch_optional(&self.pool)
                .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(StorageError::EventNotFound {
                submission_id,
                event_id,
            }),
        }
    }

    async fn list_events(
        &self,
        submission_id: SubmissionId,
        filter: KindFilter,
    ) -> Result<Vec<CommentEvent>, StorageError> {
        let rows = match filter {
            KindFilter::All => {
                sqlx::query(&format!(
                    "SELECT {EVENT_COLUMNS}
                     FROM comment_events
                     WHERE submission_id = ? AND is_deleted = 0
                     ORDER BY COALESCE(server_time_us, local_time_us) DESC, id DESC"
                ))
                .bind(submission_id.0)
                .fetch_all(&self.pool)
                .await?
            }
            KindFilter::Only(kind) => {
                sqlx::query(&format!(
                    "SELECT {EVENT_COLUMNS}
                     FROM comment_events
                     WHERE submission_id = ? AND is_deleted = 0 AND kind = ?
                     ORDER BY COALESCE(server_time_us, local_time_us) DESC, id DESC"
                ))
                .bind(submission_id.0)
                .bind(kind.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(event_from_row).collect()
    }
}

async fn load_submission(
    conn: &mut SqliteConnection,
    id: SubmissionId,
) -> Result<SubmissionRecord, StorageError> {
    let row = sqlx::query(&format!(
        "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = ?"
    ))
    .bind(id.0)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StorageError::SubmissionNotFound(id))?;
    submission_from_row(&row)
}

async fn store_submission(
    conn: &mut SqliteConnection,
    mut record: SubmissionRecord,
) -> Result<SubmissionRecord, StorageError> {
    record.updated_at = from_micros(micros(Utc::now()))?;
    sqlx::query(
        "UPDATE submissions
         SET status = ?, flagged = ?, flag_reason = ?, admin_notes = ?, scores_json = ?, updated_at_us = ?
         WHERE id = ?",
    )
    .bind(record.status.as_str())
    .bind(record.flagged)
    .bind(record.flag_reason.as_deref())
    .bind(&record.admin_notes)
    .bind(serde_json::to_string(&record.scores)?)
    .bind(micros(record.updated_at))
    .bind(record.id.0)
    .execute(&mut *conn)
    .await?;
    Ok(record)
}

async fn load_event(
    conn: &mut SqliteConnection,
    submission_id: SubmissionId,
    event_id: EventId,
) -> Result<Option<CommentEvent>, StorageError> {
    let row = sqlx::query(&format!(
        "SELECT {EVENT_COLUMNS} FROM comment_events WHERE id = ? AND submission_id = ?"
    ))
    .bind(event_id.0)
    .bind(submission_id.0)
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(event_from_row).transpose()
}

fn event_from_row(row: &SqliteRow) -> Result<CommentEvent, StorageError> {
    let body: EventBody = serde_json::from_str(&row.try_get::<String, _>("body_json")?)?;
    Ok(CommentEvent {
        id: EventId(row.try_get("id")?),
        submission_id: SubmissionId(row.try_get("submission_id")?),
        author: AdminIdentity::new(
            row.try_get::<String, _>("author_id")?,
            row.try_get::<String, _>("author_name")?,
            row.try_get::<String, _>("author_email")?,
        ),
        created_at: EventTimestamp {
            server_time: row
                .try_get::<Option<i64>, _>("server_time_us")?
                .map(from_micros)
                .transpose()?,
            local_fallback: from_micros(row.try_get("local_time_us")?)?,
        },
        updated_at: row
            .try_get::<Option<i64>, _>("updated_at_us")?
            .map(from_micros)
            .transpose()?,
        is_edited: row.try_get("is_edited")?,
        is_deleted: row.try_get("is_deleted")?,
        body,
    })
}

fn submission_from_row(row: &SqliteRow) -> Result<SubmissionRecord, StorageError> {
    let status = row
        .try_get::<String, _>("status")?
        .parse::<SubmissionStatus>()
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    Ok(SubmissionRecord {
        id: SubmissionId(row.try_get("id")?),
        title: row.try_get("title")?,
        director_name: row.try_get("director_name")?,
        applicant_email: row.try_get("applicant_email")?,
        category: row.try_get("category")?,
        status,
        flagged: row.try_get("flagged")?,
        flag_reason: row.try_get("flag_reason")?,
        admin_notes: row.try_get("admin_notes")?,
        scores: serde_json::from_str(&row.try_get::<String, _>("scores_json")?)?,
        submitted_at: from_micros(row.try_get("submitted_at_us")?)?,
        updated_at: from_micros(row.try_get("updated_at_us")?)?,
    })
}

fn micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(value: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::<Utc>::from_timestamp_micros(value)
        .ok_or_else(|| StorageError::Backend(format!("timestamp out of range: {value}")))
}

/// Creates the directory that will hold the database file of a sqlite url.
pub fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/sqlite_tests.rs"]
mod tests;
