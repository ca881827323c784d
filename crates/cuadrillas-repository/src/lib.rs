//! Persistence for crew tasks, field events and upload batches.
//!
//! [`TrackingRepository`] is the storage-agnostic contract. [`FileRepository`]
//! keeps three JSON-lines collections in a directory; [`WarehouseRepository`]
//! runs the same contract against Postgres.

pub mod file;
pub mod identity;
pub mod latest;
pub mod model;
pub mod warehouse;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::migrate::MigrateError;
use thiserror::Error;

pub use file::FileRepository;
pub use identity::{task_identity, TaskIdentity};
pub use latest::{fold_latest, LatestEvents, VisibilityIndex};
pub use model::{new_token, now_iso, Event, Task, TaskFields, UploadBatch, STATUS_OPEN};
pub use warehouse::WarehouseRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] MigrateError),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record in {path} line {line}: {source}")]
    Malformed {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("insert rejected: {0}")]
    Insert(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("warehouse call exceeded {0:?}")]
    Timeout(Duration),
}

impl RepositoryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[async_trait]
pub trait TrackingRepository: Send + Sync {
    /// Inserts rows whose `unique_key` is not stored yet and returns how many went in.
    async fn upsert_tasks(&self, rows: &[Task]) -> Result<usize, RepositoryError>;

    async fn insert_event(&self, event: &Event) -> Result<(), RepositoryError>;

    /// Tasks of a crew (trimmed match), minus those of disabled uploads.
    async fn list_tasks_by_cuadrilla(&self, cuadrilla: &str) -> Result<Vec<Task>, RepositoryError>;

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, RepositoryError>;

    /// Events of a task, ascending by `event_time`, insertion order on ties.
    async fn list_events_by_task(&self, task_id: &str) -> Result<Vec<Event>, RepositoryError>;

    /// Latest visible event per `unique_key`, newest first.
    async fn dashboard_latest(&self) -> Result<Vec<Event>, RepositoryError>;

    async fn create_upload(&self, upload: &UploadBatch) -> Result<(), RepositoryError>;

    /// Newest uploads first.
    async fn list_uploads(&self) -> Result<Vec<UploadBatch>, RepositoryError>;

    async fn get_upload(&self, upload_id: &str) -> Result<Option<UploadBatch>, RepositoryError>;

    /// Stores the number of tasks an import inserted. `false` when the upload does not exist.
    async fn set_upload_rows(&self, upload_id: &str, rows_imported: u64) -> Result<bool, RepositoryError>;

    /// Returns `false` when the upload does not exist.
    async fn set_upload_active(&self, upload_id: &str, active: bool) -> Result<bool, RepositoryError>;

    /// Removes the upload, its stored file, its tasks and their events.
    async fn delete_upload(&self, upload_id: &str) -> Result<Option<UploadBatch>, RepositoryError>;
}

/// Best-effort removal of an upload's stored spreadsheet.
pub(crate) async fn remove_stored_file(upload: &UploadBatch) {
    let Some(path) = upload.stored_path.as_deref().filter(|p| !p.is_empty()) else {
        return;
    };
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path, "removed stored upload file"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path, "stored upload file already gone");
        }
        Err(err) => {
            tracing::warn!(path, upload_id = %upload.upload_id, "failed to remove stored upload file: {err}");
        }
    }
}

pub(crate) fn sort_uploads_newest_first(uploads: &mut [UploadBatch]) {
    uploads.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
}
