//! Postgres-backed repository.
//!
//! Upserts go through a per-call staging table and a set-based `MERGE`. On a
//! key conflict only `status`, `source_file` and `updated_at` are refreshed;
//! identity and description columns keep their first-import values.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::latest::{fold_latest, VisibilityIndex};
use crate::model::{Event, Task, UploadBatch};
use crate::{remove_stored_file, RepositoryError, TrackingRepository};

const TASK_COLUMNS: &str = "task_id, unique_key, upload_id, source_file, contratista, ot, ut, \
     desc_ot, desc_op, cuadrilla, id_cuadrilla, status, created_at, updated_at";

const EVENT_COLUMNS: &str = "event_id, task_id, unique_key, ot, cuadrilla, id_cuadrilla, \
     event_type, event_time, lat, lon, accuracy_m, pause_reason, comment, photo_url, created_at";

/// Every character `str::trim` strips, so `btrim` matches crews the way the file backend does.
const TRIM_CHARS: &str = "\u{9}\u{a}\u{b}\u{c}\u{d}\u{20}\u{85}\u{a0}\u{1680}\
    \u{2000}\u{2001}\u{2002}\u{2003}\u{2004}\u{2005}\u{2006}\u{2007}\u{2008}\u{2009}\u{200a}\
    \u{2028}\u{2029}\u{202f}\u{205f}\u{3000}";

const UPLOAD_COLUMNS: &str =
    "upload_id, filename, stored_path, sheet, rows_imported, uploaded_at, active";

#[derive(Clone)]
pub struct WarehouseRepository {
    pool: PgPool,
    timeout: Duration,
}

impl WarehouseRepository {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        timeout: Duration,
    ) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(timeout)
            .connect(database_url)
            .await?;
        Ok(Self { pool, timeout })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, RepositoryError>
    where
        F: Future<Output = Result<T, RepositoryError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| RepositoryError::Timeout(self.timeout))?
    }

    async fn merge_tasks(&self, rows: &[Task]) -> Result<usize, RepositoryError> {
        let staging = format!("_stg_tasks_{}", Uuid::new_v4().simple());
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            r#"
            CREATE TEMP TABLE {staging} (
                ordinal BIGINT NOT NULL,
                task_id TEXT NOT NULL,
                unique_key TEXT NOT NULL,
                upload_id TEXT,
                source_file TEXT NOT NULL,
                contratista TEXT NOT NULL,
                ot TEXT NOT NULL,
                ut TEXT NOT NULL,
                desc_ot TEXT NOT NULL,
                desc_op TEXT NOT NULL,
                cuadrilla TEXT NOT NULL,
                id_cuadrilla TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            ) ON COMMIT DROP
            "#
        ))
        .execute(&mut *tx)
        .await?;

        let ordinals: Vec<i64> = (0..rows.len() as i64).collect();
        let upload_ids: Vec<Option<String>> = rows.iter().map(|row| row.upload_id.clone()).collect();

        sqlx::query(&format!(
            r#"
            INSERT INTO {staging} (ordinal, {TASK_COLUMNS})
            SELECT * FROM UNNEST(
                $1::BIGINT[], $2::TEXT[], $3::TEXT[], $4::TEXT[], $5::TEXT[], $6::TEXT[],
                $7::TEXT[], $8::TEXT[], $9::TEXT[], $10::TEXT[], $11::TEXT[], $12::TEXT[],
                $13::TEXT[], $14::TEXT[], $15::TEXT[]
            )
            "#
        ))
        .bind(&ordinals)
        .bind(text_column(rows, |t| &t.task_id))
        .bind(text_column(rows, |t| &t.unique_key))
        .bind(&upload_ids)
        .bind(text_column(rows, |t| &t.source_file))
        .bind(text_column(rows, |t| &t.contratista))
        .bind(text_column(rows, |t| &t.ot))
        .bind(text_column(rows, |t| &t.ut))
        .bind(text_column(rows, |t| &t.desc_ot))
        .bind(text_column(rows, |t| &t.desc_op))
        .bind(text_column(rows, |t| &t.cuadrilla))
        .bind(text_column(rows, |t| &t.id_cuadrilla))
        .bind(text_column(rows, |t| &t.status))
        .bind(text_column(rows, |t| &t.created_at))
        .bind(text_column(rows, |t| &t.updated_at))
        .execute(&mut *tx)
        .await?;

        let inserted: i64 = sqlx::query_scalar(&format!(
            r#"
            SELECT COUNT(DISTINCT s.unique_key)
            FROM {staging} s
            WHERE NOT EXISTS (SELECT 1 FROM tasks t WHERE t.unique_key = s.unique_key)
            "#
        ))
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(&format!(
            r#"
            MERGE INTO tasks T
            USING (
                SELECT DISTINCT ON (unique_key) *
                FROM {staging}
                ORDER BY unique_key, ordinal
            ) S
            ON T.unique_key = S.unique_key
            WHEN NOT MATCHED THEN
                INSERT ({TASK_COLUMNS})
                VALUES (S.task_id, S.unique_key, S.upload_id, S.source_file, S.contratista,
                        S.ot, S.ut, S.desc_ot, S.desc_op, S.cuadrilla, S.id_cuadrilla,
                        S.status, S.created_at, S.updated_at)
            WHEN MATCHED THEN
                UPDATE SET
                    source_file = S.source_file,
                    status = S.status,
                    updated_at = S.updated_at
            "#
        ))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let inserted = usize::try_from(inserted).unwrap_or_default();
        debug!(candidates = rows.len(), inserted, "tasks merged");
        Ok(inserted)
    }

    async fn load_visibility(&self) -> Result<VisibilityIndex, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT t.task_id, t.upload_id
            FROM tasks t
            JOIN uploads u ON u.upload_id = t.upload_id
            WHERE NOT u.active
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut task_uploads = HashMap::with_capacity(rows.len());
        let mut inactive = HashSet::new();
        for row in rows {
            let task_id: String = row.try_get("task_id")?;
            let upload_id: String = row.try_get("upload_id")?;
            inactive.insert(upload_id.clone());
            task_uploads.insert(task_id, upload_id);
        }
        Ok(VisibilityIndex::from_parts(task_uploads, inactive))
    }
}

fn text_column(rows: &[Task], pick: fn(&Task) -> &String) -> Vec<String> {
    rows.iter().map(|row| pick(row).clone()).collect()
}

fn task_from_row(row: &PgRow) -> Result<Task, sqlx::Error> {
    Ok(Task {
        task_id: row.try_get("task_id")?,
        unique_key: row.try_get("unique_key")?,
        upload_id: row.try_get("upload_id")?,
        source_file: row.try_get("source_file")?,
        contratista: row.try_get("contratista")?,
        ot: row.try_get("ot")?,
        ut: row.try_get("ut")?,
        desc_ot: row.try_get("desc_ot")?,
        desc_op: row.try_get("desc_op")?,
        cuadrilla: row.try_get("cuadrilla")?,
        id_cuadrilla: row.try_get("id_cuadrilla")?,
        status: row.try_get("status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn event_from_row(row: &PgRow) -> Result<Event, sqlx::Error> {
    Ok(Event {
        event_id: row.try_get("event_id")?,
        task_id: row.try_get("task_id")?,
        unique_key: row.try_get("unique_key")?,
        ot: row.try_get("ot")?,
        cuadrilla: row.try_get("cuadrilla")?,
        id_cuadrilla: row.try_get("id_cuadrilla")?,
        event_type: row.try_get("event_type")?,
        event_time: row.try_get("event_time")?,
        lat: row.try_get("lat")?,
        lon: row.try_get("lon")?,
        accuracy_m: row.try_get("accuracy_m")?,
        pause_reason: row.try_get("pause_reason")?,
        comment: row.try_get("comment")?,
        photo_url: row.try_get("photo_url")?,
        created_at: row.try_get("created_at")?,
    })
}

fn upload_from_row(row: &PgRow) -> Result<UploadBatch, sqlx::Error> {
    let rows_imported: i64 = row.try_get("rows_imported")?;
    Ok(UploadBatch {
        upload_id: row.try_get("upload_id")?,
        filename: row.try_get("filename")?,
        stored_path: row.try_get("stored_path")?,
        sheet: row.try_get("sheet")?,
        rows_imported: u64::try_from(rows_imported).unwrap_or_default(),
        uploaded_at: row.try_get("uploaded_at")?,
        active: row.try_get("active")?,
    })
}

#[async_trait]
impl TrackingRepository for WarehouseRepository {
    async fn upsert_tasks(&self, rows: &[Task]) -> Result<usize, RepositoryError> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.bounded(self.merge_tasks(rows)).await
    }

    async fn insert_event(&self, event: &Event) -> Result<(), RepositoryError> {
        self.bounded(async {
            sqlx::query(&format!(
                r#"
                INSERT INTO events ({EVENT_COLUMNS})
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                "#
            ))
            .bind(&event.event_id)
            .bind(&event.task_id)
            .bind(&event.unique_key)
            .bind(&event.ot)
            .bind(&event.cuadrilla)
            .bind(&event.id_cuadrilla)
            .bind(&event.event_type)
            .bind(&event.event_time)
            .bind(event.lat)
            .bind(event.lon)
            .bind(event.accuracy_m)
            .bind(&event.pause_reason)
            .bind(&event.comment)
            .bind(&event.photo_url)
            .bind(&event.created_at)
            .execute(&self.pool)
            .await
            .map_err(|err| RepositoryError::Insert(format!("event {}: {err}", event.event_id)))?;
            Ok::<_, RepositoryError>(())
        })
        .await
    }

    async fn list_tasks_by_cuadrilla(&self, cuadrilla: &str) -> Result<Vec<Task>, RepositoryError> {
        let wanted = cuadrilla.trim();
        self.bounded(async {
            let rows = sqlx::query(
                r#"
                SELECT t.*
                FROM tasks t
                LEFT JOIN uploads u ON u.upload_id = t.upload_id
                WHERE btrim(t.cuadrilla, $2) = $1
                  AND (u.upload_id IS NULL OR u.active)
                ORDER BY t.seq
                "#,
            )
            .bind(wanted)
            .bind(TRIM_CHARS)
            .fetch_all(&self.pool)
            .await?;
            Ok::<_, RepositoryError>(rows.iter().map(task_from_row).collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, RepositoryError> {
        self.bounded(async {
            let row = sqlx::query("SELECT * FROM tasks WHERE task_id = $1 LIMIT 1")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok::<_, RepositoryError>(row.as_ref().map(task_from_row).transpose()?)
        })
        .await
    }

    async fn list_events_by_task(&self, task_id: &str) -> Result<Vec<Event>, RepositoryError> {
        self.bounded(async {
            let rows = sqlx::query(
                r#"
                SELECT * FROM events
                WHERE task_id = $1
                ORDER BY event_time COLLATE "C", seq
                "#,
            )
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?;
            Ok::<_, RepositoryError>(rows.iter().map(event_from_row).collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn dashboard_latest(&self) -> Result<Vec<Event>, RepositoryError> {
        self.bounded(async {
            let visibility = self.load_visibility().await?;
            let rows = sqlx::query("SELECT * FROM events ORDER BY seq")
                .fetch_all(&self.pool)
                .await?;
            let events = rows.iter().map(event_from_row).collect::<Result<Vec<_>, _>>()?;

            let latest = fold_latest(&events, &visibility);
            if latest.orphaned > 0 {
                warn!(
                    orphaned = latest.orphaned,
                    "events without a unique_key were left off the dashboard"
                );
            }
            Ok::<_, RepositoryError>(latest.rows)
        })
        .await
    }

    async fn create_upload(&self, upload: &UploadBatch) -> Result<(), RepositoryError> {
        self.bounded(async {
            sqlx::query(&format!(
                "INSERT INTO uploads ({UPLOAD_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
            ))
            .bind(&upload.upload_id)
            .bind(&upload.filename)
            .bind(&upload.stored_path)
            .bind(&upload.sheet)
            .bind(i64::try_from(upload.rows_imported).unwrap_or(i64::MAX))
            .bind(&upload.uploaded_at)
            .bind(upload.active)
            .execute(&self.pool)
            .await
            .map_err(|err| RepositoryError::Insert(format!("upload {}: {err}", upload.upload_id)))?;
            Ok::<_, RepositoryError>(())
        })
        .await
    }

    async fn list_uploads(&self) -> Result<Vec<UploadBatch>, RepositoryError> {
        self.bounded(async {
            let rows = sqlx::query(&format!(
                r#"SELECT {UPLOAD_COLUMNS} FROM uploads ORDER BY uploaded_at COLLATE "C" DESC"#
            ))
            .fetch_all(&self.pool)
            .await?;
            Ok::<_, RepositoryError>(rows.iter().map(upload_from_row).collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn get_upload(&self, upload_id: &str) -> Result<Option<UploadBatch>, RepositoryError> {
        self.bounded(async {
            let row = sqlx::query(&format!(
                "SELECT {UPLOAD_COLUMNS} FROM uploads WHERE upload_id = $1"
            ))
            .bind(upload_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok::<_, RepositoryError>(row.as_ref().map(upload_from_row).transpose()?)
        })
        .await
    }

    async fn set_upload_rows(&self, upload_id: &str, rows_imported: u64) -> Result<bool, RepositoryError> {
        self.bounded(async {
            let result = sqlx::query("UPDATE uploads SET rows_imported = $1 WHERE upload_id = $2")
                .bind(i64::try_from(rows_imported).unwrap_or(i64::MAX))
                .bind(upload_id)
                .execute(&self.pool)
                .await?;
            Ok::<_, RepositoryError>(result.rows_affected() > 0)
        })
        .await
    }

    async fn set_upload_active(&self, upload_id: &str, active: bool) -> Result<bool, RepositoryError> {
        let changed = self
            .bounded(async {
                let result = sqlx::query("UPDATE uploads SET active = $1 WHERE upload_id = $2")
                    .bind(active)
                    .bind(upload_id)
                    .execute(&self.pool)
                    .await?;
                Ok::<_, RepositoryError>(result.rows_affected() > 0)
            })
            .await?;

        if changed {
            info!(upload_id, active, "upload visibility changed");
        }
        Ok(changed)
    }

    async fn delete_upload(&self, upload_id: &str) -> Result<Option<UploadBatch>, RepositoryError> {
        let removed = self
            .bounded(async {
                let mut tx = self.pool.begin().await?;

                let row = sqlx::query(&format!(
                    "DELETE FROM uploads WHERE upload_id = $1 RETURNING {UPLOAD_COLUMNS}"
                ))
                .bind(upload_id)
                .fetch_optional(&mut *tx)
                .await?;
                let Some(row) = row else {
                    return Ok(None);
                };
                let removed = upload_from_row(&row)?;

                let events = sqlx::query(
                    r#"
                    DELETE FROM events
                    WHERE task_id IN (SELECT task_id FROM tasks WHERE upload_id = $1)
                    "#,
                )
                .bind(upload_id)
                .execute(&mut *tx)
                .await?;
                let tasks = sqlx::query("DELETE FROM tasks WHERE upload_id = $1")
                    .bind(upload_id)
                    .execute(&mut *tx)
                    .await?;

                tx.commit().await?;
                info!(
                    upload_id,
                    tasks_removed = tasks.rows_affected(),
                    events_removed = events.rows_affected(),
                    "upload deleted"
                );
                Ok::<_, RepositoryError>(Some(removed))
            })
            .await?;

        if let Some(upload) = &removed {
            remove_stored_file(upload).await;
        }
        Ok(removed)
    }
}
