//! Persistence for submission records and their comment logs.

use std::sync::Arc;

use anyhow::Result;

mod backend;
mod error;
mod log_store;
mod memory;
mod sqlite;

pub use backend::{Appended, RecordChange, ReviewBackend};
pub use error::StorageError;
pub use log_store::{CommentLogStore, Subscription, DEFAULT_FEED_CAPACITY};
pub use memory::MemoryStorage;
pub use sqlite::{ensure_sqlite_parent_dir_exists, SqliteStorage};

/// Database url that selects the in-process [`MemoryStorage`].
pub const MEMORY_DATABASE_URL: &str = "memory";

/// Opens the backend named by `database_url`: `memory` or a sqlite url.
pub async fn open_backend(database_url: &str) -> Result<Arc<dyn ReviewBackend>> {
    if database_url.trim() == MEMORY_DATABASE_URL {
        return Ok(Arc::new(MemoryStorage::new()));
    }
    Ok(Arc::new(SqliteStorage::new(database_url).await?))
}
