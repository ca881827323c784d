//! Persisted record shapes shared by every backend.
//!
//! Field names are the on-disk and wire names; timestamps are UTC ISO-8601
//! strings and are compared lexicographically.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::task_identity;

/// Status assigned to freshly imported tasks.
pub const STATUS_OPEN: &str = "ABIERTO";

fn default_status() -> String {
    STATUS_OPEN.to_string()
}

fn default_active() -> bool {
    true
}

/// Current UTC time as an ISO-8601 string with microseconds and `+00:00` offset.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Random 32-character hex token used for event and upload ids.
pub fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// The seven spreadsheet columns that describe one unit of work.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskFields {
    pub contratista: String,
    pub ot: String,
    pub ut: String,
    pub desc_ot: String,
    pub desc_op: String,
    pub cuadrilla: String,
    pub id_cuadrilla: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub task_id: String,
    pub unique_key: String,
    #[serde(default)]
    pub upload_id: Option<String>,
    #[serde(default)]
    pub source_file: String,
    pub contratista: String,
    pub ot: String,
    pub ut: String,
    pub desc_ot: String,
    pub desc_op: String,
    pub cuadrilla: String,
    pub id_cuadrilla: String,
    #[serde(default = "default_status")]
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Task {
    /// Builds an open task for an imported row, deriving its identity from the key fields.
    /// Stored fields are trimmed.
    pub fn from_fields(
        fields: TaskFields,
        upload_id: Option<String>,
        source_file: impl Into<String>,
    ) -> Self {
        let identity = task_identity(
            &fields.contratista,
            &fields.ot,
            &fields.ut,
            &fields.desc_op,
            &fields.id_cuadrilla,
        );
        let now = now_iso();
        Self {
            task_id: identity.task_id,
            unique_key: identity.unique_key,
            upload_id,
            source_file: source_file.into(),
            contratista: fields.contratista.trim().to_string(),
            ot: fields.ot.trim().to_string(),
            ut: fields.ut.trim().to_string(),
            desc_ot: fields.desc_ot.trim().to_string(),
            desc_op: fields.desc_op.trim().to_string(),
            cuadrilla: fields.cuadrilla.trim().to_string(),
            id_cuadrilla: fields.id_cuadrilla.trim().to_string(),
            status: default_status(),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub task_id: String,
    #[serde(default)]
    pub unique_key: Option<String>,
    #[serde(default)]
    pub ot: String,
    #[serde(default)]
    pub cuadrilla: String,
    #[serde(default)]
    pub id_cuadrilla: String,
    pub event_type: String,
    pub event_time: String,
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
    #[serde(default)]
    pub photo_url: Option<String>,
    pub created_at: String,
}

/// Provenance of one imported spreadsheet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadBatch {
    pub upload_id: String,
    pub filename: String,
    #[serde(default)]
    pub stored_path: Option<String>,
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub rows_imported: u64,
    pub uploaded_at: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl UploadBatch {
    pub fn new(upload_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            upload_id: upload_id.into(),
            filename: filename.into(),
            stored_path: None,
            sheet: None,
            rows_imported: 0,
            uploaded_at: now_iso(),
            active: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imported_fields_are_stored_trimmed() {
        let task = Task::from_fields(
            TaskFields {
                contratista: " ACME".into(),
                ot: "1001\t".into(),
                ut: "UT-1".into(),
                desc_ot: "Mant".into(),
                desc_op: "Poda".into(),
                cuadrilla: "\u{a0}Norte\u{a0}".into(),
                id_cuadrilla: "17 ".into(),
            },
            None,
            "plan.csv",
        );
        assert_eq!(task.cuadrilla, "Norte");
        assert_eq!(task.contratista, "ACME");
        assert_eq!(task.ot, "1001");
        assert_eq!(task.id_cuadrilla, "17");
        assert_eq!(task.unique_key, "ACME||1001||UT-1||Poda||17");
    }

    #[test]
    fn legacy_records_default_missing_fields() {
        let task: Task = serde_json::from_str(
            r#"{"task_id":"a","unique_key":"k","contratista":"C","ot":"1","ut":"U",
                "desc_ot":"","desc_op":"","cuadrilla":"Norte","id_cuadrilla":"7",
                "created_at":"2025-01-01T00:00:00+00:00","updated_at":"2025-01-01T00:00:00+00:00"}"#,
        )
        .expect("parse legacy task");
        assert_eq!(task.upload_id, None);
        assert_eq!(task.status, STATUS_OPEN);

        let upload: UploadBatch = serde_json::from_str(
            r#"{"upload_id":"u","filename":"f.xlsx","uploaded_at":"2025-01-01T00:00:00+00:00"}"#,
        )
        .expect("parse legacy upload");
        assert!(upload.active);
        assert_eq!(upload.stored_path, None);
    }

    #[test]
    fn now_iso_is_utc_offset() {
        let now = now_iso();
        assert!(now.ends_with("+00:00"), "{now}");
    }
}
