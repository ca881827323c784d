use std::path::Path;

use cuadrillas_repository::{new_token, now_iso, Task, TrackingRepository, UploadBatch};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::ingest::RowSource;

const FALLBACK_FILENAME: &str = "archivo";

#[derive(Debug, Clone)]
pub struct ImportFile {
    pub filename: String,
    pub contents: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ImportReport {
    pub upload_id: String,
    pub filename: String,
    pub stored_path: Option<String>,
    pub sheet: Option<String>,
    pub candidates: usize,
    pub imported: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub files: Vec<ImportReport>,
}

/// Filename safe to embed in a stored path.
pub fn safe_filename(filename: &str) -> String {
    let name = filename.trim();
    if name.is_empty() {
        return FALLBACK_FILENAME.to_string();
    }
    name.replace(['/', '\\'], "_")
}

/// Imports one spreadsheet as a new upload batch.
///
/// The batch is recorded before its tasks; if a later step fails it is
/// deleted again together with its tasks and stored copy. Rows whose logical
/// key already exists are dropped, and the batch is kept even when nothing new
/// was inserted. A failure to keep a copy of the file only leaves
/// `stored_path` empty.
pub async fn import_file(
    repository: &dyn TrackingRepository,
    source: &dyn RowSource,
    uploads_dir: &Path,
    file: &ImportFile,
) -> Result<ImportReport> {
    let sheet = source.read_rows(&file.contents)?;

    let upload_id = new_token();
    let stored_path = store_copy(uploads_dir, &upload_id, file).await;

    let upload = UploadBatch {
        upload_id: upload_id.clone(),
        filename: file.filename.clone(),
        stored_path: stored_path.clone(),
        sheet: sheet.sheet.clone(),
        rows_imported: 0,
        uploaded_at: now_iso(),
        active: true,
    };
    if let Err(err) = repository.create_upload(&upload).await {
        discard_copy(stored_path.as_deref()).await;
        return Err(err.into());
    }

    let tasks: Vec<Task> = sheet
        .rows
        .into_iter()
        .map(|fields| Task::from_fields(fields, Some(upload_id.clone()), file.filename.clone()))
        .collect();
    let candidates = tasks.len();

    let imported = match fill_batch(repository, &upload_id, &tasks).await {
        Ok(imported) => imported,
        Err(err) => {
            roll_back(repository, &upload_id).await;
            return Err(err);
        }
    };

    info!(
        upload_id = %upload_id,
        filename = %file.filename,
        candidates,
        imported,
        "spreadsheet imported"
    );

    Ok(ImportReport {
        upload_id,
        filename: file.filename.clone(),
        stored_path,
        sheet: sheet.sheet,
        candidates,
        imported,
    })
}

async fn fill_batch(
    repository: &dyn TrackingRepository,
    upload_id: &str,
    tasks: &[Task],
) -> Result<usize> {
    let imported = repository.upsert_tasks(tasks).await?;
    repository
        .set_upload_rows(upload_id, imported as u64)
        .await?;
    Ok(imported)
}

async fn roll_back(repository: &dyn TrackingRepository, upload_id: &str) {
    if let Err(err) = repository.delete_upload(upload_id).await {
        warn!(upload_id, "could not remove the batch of a failed import: {err}");
    }
}

/// Imports files in order. The first failure aborts the rest; earlier files stay imported.
pub async fn import_files(
    repository: &dyn TrackingRepository,
    source: &dyn RowSource,
    uploads_dir: &Path,
    files: &[ImportFile],
) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();
    for file in files {
        let report = import_file(repository, source, uploads_dir, file).await?;
        summary.imported += report.imported;
        summary.files.push(report);
    }
    Ok(summary)
}

async fn store_copy(uploads_dir: &Path, upload_id: &str, file: &ImportFile) -> Option<String> {
    let path = uploads_dir.join(format!("{upload_id}__{}", safe_filename(&file.filename)));

    let written = async {
        tokio::fs::create_dir_all(uploads_dir).await?;
        tokio::fs::write(&path, &file.contents).await
    }
    .await;

    match written {
        Ok(()) => Some(path.display().to_string()),
        Err(err) => {
            warn!(
                path = %path.display(),
                filename = %file.filename,
                "could not keep a copy of the uploaded file: {err}"
            );
            None
        }
    }
}

async fn discard_copy(stored_path: Option<&str>) {
    let Some(path) = stored_path else {
        return;
    };
    if let Err(err) = tokio::fs::remove_file(path).await {
        warn!(path, "could not remove the copy of a failed import: {err}");
    }
}
