use cuadrillas_repository::{Task, TrackingRepository, UploadBatch};

use crate::error::{CoreError, Result};

/// Shows or hides everything imported by one upload.
pub async fn set_upload_active(
    repository: &dyn TrackingRepository,
    upload_id: &str,
    active: bool,
) -> Result<()> {
    if !repository.set_upload_active(upload_id, active).await? {
        return Err(CoreError::NotFound(format!("upload {upload_id}")));
    }
    Ok(())
}

/// Removes an upload together with its tasks and their events.
pub async fn delete_upload(
    repository: &dyn TrackingRepository,
    upload_id: &str,
) -> Result<UploadBatch> {
    repository
        .delete_upload(upload_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("upload {upload_id}")))
}

pub async fn require_task(repository: &dyn TrackingRepository, task_id: &str) -> Result<Task> {
    repository
        .get_task(task_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("task {task_id}")))
}
