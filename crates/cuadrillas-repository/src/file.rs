//! Directory-backed repository: one JSON-lines file per collection.
//!
//! Each collection is loaded at open and guarded by its own mutex. A mutation
//! writes the whole collection to a temp file, renames it into place, and only
//! then swaps the in-memory copy. Multi-collection operations lock in the
//! order uploads, tasks, events.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::latest::{fold_latest, sort_history, VisibilityIndex};
use crate::model::{Event, Task, UploadBatch};
use crate::{remove_stored_file, sort_uploads_newest_first, RepositoryError, TrackingRepository};

pub const TASKS_FILE: &str = "tasks.jsonl";
pub const EVENTS_FILE: &str = "events.jsonl";
pub const UPLOADS_FILE: &str = "uploads.jsonl";

struct Collection<T> {
    path: PathBuf,
    rows: Mutex<Vec<T>>,
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    async fn open(path: PathBuf) -> Result<Self, RepositoryError> {
        let rows = read_lines(&path).await?;
        Ok(Self {
            path,
            rows: Mutex::new(rows),
        })
    }

    async fn snapshot(&self) -> Vec<T> {
        self.rows.lock().await.clone()
    }
}

async fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, RepositoryError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(RepositoryError::io(path, err)),
    };

    let mut rows = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(line).map_err(|source| RepositoryError::Malformed {
            path: path.to_path_buf(),
            line: idx + 1,
            source,
        })?;
        rows.push(row);
    }
    Ok(rows)
}

async fn write_lines<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), RepositoryError> {
    let mut buffer = String::new();
    for row in rows {
        buffer.push_str(&serde_json::to_string(row)?);
        buffer.push('\n');
    }

    let temp_path = path.with_extension("jsonl.tmp");
    tokio::fs::write(&temp_path, buffer)
        .await
        .map_err(|err| RepositoryError::io(&temp_path, err))?;
    tokio::fs::rename(&temp_path, path)
        .await
        .map_err(|err| RepositoryError::io(path, err))?;

    debug!(path = %path.display(), rows = rows.len(), "collection written");
    Ok(())
}

pub struct FileRepository {
    tasks: Collection<Task>,
    events: Collection<Event>,
    uploads: Collection<UploadBatch>,
}

impl FileRepository {
    /// Opens (and creates when absent) the data directory.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|err| RepositoryError::io(&root, err))?;

        let tasks = Collection::open(root.join(TASKS_FILE)).await?;
        let events = Collection::open(root.join(EVENTS_FILE)).await?;
        let uploads = Collection::open(root.join(UPLOADS_FILE)).await?;

        info!(root = %root.display(), "opened file repository");
        Ok(Self {
            tasks,
            events,
            uploads,
        })
    }
}

#[async_trait]
impl TrackingRepository for FileRepository {
    async fn upsert_tasks(&self, rows: &[Task]) -> Result<usize, RepositoryError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut guard = self.tasks.rows.lock().await;
        let fresh: Vec<Task> = {
            let mut seen: HashSet<&str> = guard.iter().map(|t| t.unique_key.as_str()).collect();
            rows.iter()
                .filter(|row| seen.insert(row.unique_key.as_str()))
                .cloned()
                .collect()
        };

        if fresh.is_empty() {
            debug!(candidates = rows.len(), "no new tasks to insert");
            return Ok(0);
        }

        let inserted = fresh.len();
        let mut next = guard.clone();
        next.extend(fresh);
        write_lines(&self.tasks.path, &next).await?;
        *guard = next;

        debug!(candidates = rows.len(), inserted, "tasks upserted");
        Ok(inserted)
    }

    async fn insert_event(&self, event: &Event) -> Result<(), RepositoryError> {
        let mut guard = self.events.rows.lock().await;
        let mut next = guard.clone();
        next.push(event.clone());
        write_lines(&self.events.path, &next)
            .await
            .map_err(|err| RepositoryError::Insert(format!("event {}: {err}", event.event_id)))?;
        *guard = next;
        Ok(())
    }

    async fn list_tasks_by_cuadrilla(&self, cuadrilla: &str) -> Result<Vec<Task>, RepositoryError> {
        let wanted = cuadrilla.trim();
        let uploads = self.uploads.snapshot().await;
        let visibility = VisibilityIndex::build(&[], &uploads);

        let tasks = self.tasks.rows.lock().await;
        Ok(tasks
            .iter()
            .filter(|task| task.cuadrilla.trim() == wanted)
            .filter(|task| !visibility.upload_hidden(task.upload_id.as_deref()))
            .cloned()
            .collect())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, RepositoryError> {
        let tasks = self.tasks.rows.lock().await;
        Ok(tasks.iter().find(|task| task.task_id == task_id).cloned())
    }

    async fn list_events_by_task(&self, task_id: &str) -> Result<Vec<Event>, RepositoryError> {
        let mut events: Vec<Event> = {
            let events = self.events.rows.lock().await;
            events
                .iter()
                .filter(|event| event.task_id == task_id)
                .cloned()
                .collect()
        };
        sort_history(&mut events);
        Ok(events)
    }

    async fn dashboard_latest(&self) -> Result<Vec<Event>, RepositoryError> {
        let uploads = self.uploads.snapshot().await;
        let tasks = self.tasks.snapshot().await;
        let visibility = VisibilityIndex::build(&tasks, &uploads);

        let events = self.events.rows.lock().await;
        let latest = fold_latest(events.iter(), &visibility);
        if latest.orphaned > 0 {
            warn!(
                orphaned = latest.orphaned,
                "events without a unique_key were left off the dashboard"
            );
        }
        Ok(latest.rows)
    }

    async fn create_upload(&self, upload: &UploadBatch) -> Result<(), RepositoryError> {
        let mut guard = self.uploads.rows.lock().await;
        let mut next = guard.clone();
        next.push(upload.clone());
        write_lines(&self.uploads.path, &next)
            .await
            .map_err(|err| RepositoryError::Insert(format!("upload {}: {err}", upload.upload_id)))?;
        *guard = next;
        Ok(())
    }

    async fn list_uploads(&self) -> Result<Vec<UploadBatch>, RepositoryError> {
        let mut uploads = self.uploads.snapshot().await;
        sort_uploads_newest_first(&mut uploads);
        Ok(uploads)
    }

    async fn get_upload(&self, upload_id: &str) -> Result<Option<UploadBatch>, RepositoryError> {
        let uploads = self.uploads.rows.lock().await;
        Ok(uploads.iter().find(|u| u.upload_id == upload_id).cloned())
    }

    async fn set_upload_rows(&self, upload_id: &str, rows_imported: u64) -> Result<bool, RepositoryError> {
        let mut guard = self.uploads.rows.lock().await;
        let Some(position) = guard.iter().position(|u| u.upload_id == upload_id) else {
            return Ok(false);
        };

        let mut next = guard.clone();
        next[position].rows_imported = rows_imported;
        write_lines(&self.uploads.path, &next).await?;
        *guard = next;
        Ok(true)
    }

    async fn set_upload_active(&self, upload_id: &str, active: bool) -> Result<bool, RepositoryError> {
        let mut guard = self.uploads.rows.lock().await;
        let Some(position) = guard.iter().position(|u| u.upload_id == upload_id) else {
            return Ok(false);
        };

        let mut next = guard.clone();
        next[position].active = active;
        write_lines(&self.uploads.path, &next).await?;
        *guard = next;

        info!(upload_id, active, "upload visibility changed");
        Ok(true)
    }

    async fn delete_upload(&self, upload_id: &str) -> Result<Option<UploadBatch>, RepositoryError> {
        let mut uploads = self.uploads.rows.lock().await;
        let Some(position) = uploads.iter().position(|u| u.upload_id == upload_id) else {
            return Ok(None);
        };

        // The batch record is removed last so an interrupted delete can be retried.
        let mut tasks = self.tasks.rows.lock().await;
        let (dropped, kept): (Vec<Task>, Vec<Task>) = tasks
            .iter()
            .cloned()
            .partition(|task| task.upload_id.as_deref() == Some(upload_id));
        let dropped_ids: HashSet<String> = dropped.into_iter().map(|task| task.task_id).collect();

        let mut events = self.events.rows.lock().await;
        let before = events.len();
        let remaining: Vec<Event> = events
            .iter()
            .filter(|event| !dropped_ids.contains(&event.task_id))
            .cloned()
            .collect();
        let events_removed = before - remaining.len();
        if events_removed > 0 {
            write_lines(&self.events.path, &remaining).await?;
            *events = remaining;
        }
        drop(events);

        if !dropped_ids.is_empty() {
            write_lines(&self.tasks.path, &kept).await?;
            *tasks = kept;
        }
        drop(tasks);

        let mut next_uploads = uploads.clone();
        let removed = next_uploads.remove(position);
        write_lines(&self.uploads.path, &next_uploads).await?;
        *uploads = next_uploads;
        drop(uploads);

        remove_stored_file(&removed).await;

        info!(
            upload_id,
            tasks_removed = dropped_ids.len(),
            events_removed,
            "upload deleted"
        );
        Ok(Some(removed))
    }
}
