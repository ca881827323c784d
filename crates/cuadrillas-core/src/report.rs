//! Field reports: turning a crew submission into a stored event.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use cuadrillas_bucket::{upload_photo, BucketStore, StoredPhoto};
use cuadrillas_repository::{new_token, now_iso, Event, TrackingRepository};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventReport {
    pub task_id: String,
    #[serde(default)]
    pub ot: String,
    #[serde(default)]
    pub cuadrilla: String,
    #[serde(default)]
    pub id_cuadrilla: String,
    pub event_type: String,
    #[serde(default)]
    pub event_time: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub accuracy_m: Option<f64>,
    #[serde(default)]
    pub pause_reason: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PhotoAttachment {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    pub filename: Option<String>,
}

/// Normalizes a client timestamp to the UTC form used for stored events.
pub fn normalize_event_time(raw: &str) -> Result<String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|parsed| {
            parsed
                .with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Micros, false)
        })
        .map_err(|err| CoreError::Validation(format!("invalid event_time '{raw}': {err}")))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Records a report against a task.
///
/// The task's `unique_key` is copied onto the event when the task exists;
/// reports for unknown tasks are still stored, without a key. A photo needs a
/// configured bucket.
pub async fn record_event(
    repository: &dyn TrackingRepository,
    bucket: Option<&dyn BucketStore>,
    report: EventReport,
    photo: Option<PhotoAttachment>,
) -> Result<Event> {
    let task_id = report.task_id.trim().to_string();
    let event_type = report.event_type.trim().to_string();
    if task_id.is_empty() {
        return Err(CoreError::Validation("task_id is required".into()));
    }
    if event_type.is_empty() {
        return Err(CoreError::Validation("event_type is required".into()));
    }

    let event_time = match non_empty(report.event_time) {
        Some(raw) => normalize_event_time(&raw)?,
        None => now_iso(),
    };

    let unique_key = repository
        .get_task(&task_id)
        .await?
        .map(|task| task.unique_key);
    if unique_key.is_none() {
        warn!(task_id = %task_id, "report for unknown task; it will not reach the dashboard");
    }

    let stored: Option<(&dyn BucketStore, StoredPhoto)> = match photo {
        Some(photo) => {
            let store = bucket.ok_or_else(|| {
                CoreError::Configuration("BUCKET_NAME is not set; photo uploads are disabled".into())
            })?;
            let stored = upload_photo(
                store,
                photo.bytes,
                photo.content_type.as_deref(),
                photo.filename.as_deref(),
            )
            .await?;
            Some((store, stored))
        }
        None => None,
    };

    let event = Event {
        event_id: new_token(),
        task_id,
        unique_key,
        ot: report.ot.trim().to_string(),
        cuadrilla: report.cuadrilla.trim().to_string(),
        id_cuadrilla: report.id_cuadrilla.trim().to_string(),
        event_type,
        event_time,
        lat: report.lat,
        lon: report.lon,
        accuracy_m: report.accuracy_m,
        pause_reason: non_empty(report.pause_reason),
        comment: non_empty(report.comment),
        photo_url: stored.as_ref().map(|(_, photo)| photo.url.clone()),
        created_at: now_iso(),
    };

    if let Err(err) = repository.insert_event(&event).await {
        if let Some((store, photo)) = &stored {
            if let Err(cleanup) = store.delete_object(&photo.key).await {
                warn!(key = %photo.key, "could not remove photo of a rejected event: {cleanup}");
            }
        }
        return Err(err.into());
    }
    info!(
        event_id = %event.event_id,
        task_id = %event.task_id,
        event_type = %event.event_type,
        "event recorded"
    );
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_time_is_normalized_to_utc() {
        assert_eq!(
            normalize_event_time("2025-03-01T07:30:00-03:00").expect("valid"),
            "2025-03-01T10:30:00.000000+00:00"
        );
        assert_eq!(
            normalize_event_time(" 2025-03-01T10:30:00Z ").expect("valid"),
            "2025-03-01T10:30:00.000000+00:00"
        );
        assert!(matches!(
            normalize_event_time("yesterday"),
            Err(CoreError::Validation(_))
        ));
    }
}
