use std::env;
use std::time::Duration;

use cuadrillas_repository::{
    Event, RepositoryError, Task, TaskFields, TrackingRepository, UploadBatch, WarehouseRepository,
};

async fn connect() -> Result<Option<WarehouseRepository>, RepositoryError> {
    let database_url = match env::var("CUADRILLAS_TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping warehouse integration test because CUADRILLAS_TEST_DATABASE_URL is not set"
            );
            return Ok(None);
        }
    };

    let repo = WarehouseRepository::connect(&database_url, 2, Duration::from_secs(30)).await?;
    repo.run_migrations().await?;
    sqlx::query("TRUNCATE TABLE events, tasks, uploads")
        .execute(repo.pool())
        .await?;
    Ok(Some(repo))
}

fn task(ot: &str, upload_id: Option<&str>) -> Task {
    Task::from_fields(
        TaskFields {
            contratista: "ACME".into(),
            ot: ot.into(),
            ut: "UT-1".into(),
            desc_ot: "Mantenimiento".into(),
            desc_op: "Poda".into(),
            cuadrilla: "Norte".into(),
            id_cuadrilla: "17".into(),
        },
        upload_id.map(str::to_string),
        "planilla.csv",
    )
}

fn event_for(task: &Task, id: &str, time: &str) -> Event {
    Event {
        event_id: id.into(),
        task_id: task.task_id.clone(),
        unique_key: Some(task.unique_key.clone()),
        ot: task.ot.clone(),
        cuadrilla: task.cuadrilla.clone(),
        id_cuadrilla: task.id_cuadrilla.clone(),
        event_type: "start".into(),
        event_time: time.into(),
        lat: None,
        lon: None,
        accuracy_m: None,
        pause_reason: None,
        comment: None,
        photo_url: None,
        created_at: time.into(),
    }
}

// Both scenarios share one database, so they run sequentially in one test.
#[tokio::test]
async fn warehouse_contract_roundtrip() -> Result<(), RepositoryError> {
    let Some(repo) = connect().await? else {
        return Ok(());
    };

    repo.create_upload(&UploadBatch::new("u1", "u1.csv")).await?;
    let a = task("OT-1", Some("u1"));
    let b = task("OT-2", None);

    assert_eq!(repo.upsert_tasks(&[]).await?, 0);
    assert_eq!(repo.upsert_tasks(&[a.clone(), b.clone(), a.clone()]).await?, 2);
    assert_eq!(repo.upsert_tasks(&[a.clone()]).await?, 0);

    let mut refreshed = a.clone();
    refreshed.source_file = "segunda.csv".into();
    refreshed.desc_ot = "ignored".into();
    repo.upsert_tasks(&[refreshed]).await?;
    let stored = repo.get_task(&a.task_id).await?.expect("task stored");
    assert_eq!(stored.source_file, "segunda.csv");
    assert_eq!(stored.desc_ot, "Mantenimiento");

    repo.insert_event(&event_for(&a, "a-late", "2025-01-01T20:00:00+00:00")).await?;
    repo.insert_event(&event_for(&a, "a-tie-1", "2025-01-01T10:00:00+00:00")).await?;
    repo.insert_event(&event_for(&a, "a-tie-2", "2025-01-01T10:00:00+00:00")).await?;
    repo.insert_event(&event_for(&b, "b-1", "2025-01-01T11:00:00+00:00")).await?;

    let history: Vec<String> = repo
        .list_events_by_task(&a.task_id)
        .await?
        .into_iter()
        .map(|e| e.event_id)
        .collect();
    assert_eq!(history, vec!["a-tie-1", "a-tie-2", "a-late"]);

    let dashboard: Vec<String> = repo
        .dashboard_latest()
        .await?
        .into_iter()
        .map(|e| e.event_id)
        .collect();
    assert_eq!(dashboard, vec!["a-late", "b-1"]);

    assert!(repo.set_upload_rows("u1", 1).await?);
    assert_eq!(repo.get_upload("u1").await?.expect("upload").rows_imported, 1);
    assert!(!repo.set_upload_rows("missing", 1).await?);

    let mut padded = task("OT-9", None);
    padded.cuadrilla = "\u{a0}Sur\u{a0}".into();
    repo.upsert_tasks(&[padded]).await?;
    assert_eq!(repo.list_tasks_by_cuadrilla("Sur").await?.len(), 1);

    assert!(repo.set_upload_active("u1", false).await?);
    assert_eq!(repo.list_tasks_by_cuadrilla(" Norte ").await?.len(), 1);
    assert_eq!(repo.dashboard_latest().await?.len(), 1);
    assert!(repo.set_upload_active("u1", true).await?);
    assert_eq!(repo.list_tasks_by_cuadrilla("Norte").await?.len(), 2);

    let removed = repo.delete_upload("u1").await?.expect("upload existed");
    assert_eq!(removed.upload_id, "u1");
    assert!(repo.get_task(&a.task_id).await?.is_none());
    assert!(repo.list_events_by_task(&a.task_id).await?.is_empty());
    assert!(repo.get_task(&b.task_id).await?.is_some());
    assert!(repo.delete_upload("u1").await?.is_none());
    assert!(!repo.set_upload_active("u1", true).await?);

    Ok(())
}
