use std::path::Path;

use cuadrillas_core::{import_file, import_files, CoreError, CsvRowSource, ImportFile};
use cuadrillas_repository::file::{TASKS_FILE, UPLOADS_FILE};
use cuadrillas_repository::{FileRepository, RepositoryError, TrackingRepository};
use tempfile::tempdir;

const HEADER: &str = "Contratista,OT,UT,Descripción OT,Descripción OP,Cuadrilla,ID Cuadrilla\n";

fn stored_copies(uploads_dir: &Path) -> usize {
    match std::fs::read_dir(uploads_dir) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

fn sheet(filename: &str, rows: &[&str]) -> ImportFile {
    let mut contents = HEADER.to_string();
    for row in rows {
        contents.push_str(row);
        contents.push('\n');
    }
    ImportFile {
        filename: filename.into(),
        contents: contents.into_bytes(),
    }
}

#[tokio::test]
async fn reimporting_the_same_sheet_adds_no_tasks() -> Result<(), CoreError> {
    let dir = tempdir().expect("tempdir");
    let repo = FileRepository::open(dir.path()).await?;
    let uploads_dir = dir.path().join("uploads");
    let source = CsvRowSource::default();

    let file = sheet(
        "semana 12.csv",
        &[
            "ACME,1001,UT-1,Mant,Poda,Norte,17",
            "ACME,1002,UT-2,Mant,Tala,Norte,17",
            "ACME,1001,UT-1,Mant,Poda,Norte,17",
        ],
    );

    let first = import_file(&repo, &source, &uploads_dir, &file).await?;
    assert_eq!(first.candidates, 3);
    assert_eq!(first.imported, 2);
    let stored = first.stored_path.clone().expect("copy kept");
    assert!(stored.ends_with(&format!("{}__semana 12.csv", first.upload_id)));
    assert_eq!(
        tokio::fs::read(&stored).await.expect("stored copy"),
        file.contents
    );

    let second = import_file(&repo, &source, &uploads_dir, &file).await?;
    assert_eq!(second.imported, 0);
    assert_ne!(second.upload_id, first.upload_id);

    let uploads = repo.list_uploads().await?;
    assert_eq!(uploads.len(), 2);
    assert!(uploads.iter().any(|u| u.upload_id == first.upload_id && u.rows_imported == 2));
    assert!(uploads.iter().any(|u| u.upload_id == second.upload_id && u.rows_imported == 0));

    let tasks = repo.list_tasks_by_cuadrilla("Norte").await?;
    assert_eq!(tasks.len(), 2);
    assert!(tasks
        .iter()
        .all(|t| t.upload_id.as_deref() == Some(first.upload_id.as_str())));
    assert!(tasks.iter().all(|t| t.source_file == "semana 12.csv"));
    Ok(())
}

#[tokio::test]
async fn failing_file_stops_the_batch_but_keeps_earlier_files() -> Result<(), CoreError> {
    let dir = tempdir().expect("tempdir");
    let repo = FileRepository::open(dir.path()).await?;
    let uploads_dir = dir.path().join("uploads");

    let files = vec![
        sheet("ok.csv", &["ACME,2001,UT-1,Mant,Poda,Sur,21"]),
        sheet("broken.csv", &["ACME,2002,UT-2,Mant,Poda,,21"]),
        sheet("never.csv", &["ACME,2003,UT-3,Mant,Poda,Sur,21"]),
    ];

    match import_files(&repo, &CsvRowSource::default(), &uploads_dir, &files).await {
        Err(CoreError::Validation(message)) => assert!(message.contains("line 2"), "{message}"),
        other => panic!("unexpected result: {other:?}"),
    }

    let tasks = repo.list_tasks_by_cuadrilla("Sur").await?;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].ot, "2001");

    let uploads = repo.list_uploads().await?;
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].filename, "ok.csv");
    Ok(())
}

#[tokio::test]
async fn summary_totals_every_file() -> Result<(), CoreError> {
    let dir = tempdir().expect("tempdir");
    let repo = FileRepository::open(dir.path()).await?;
    let uploads_dir = dir.path().join("uploads");

    let files = vec![
        sheet("a.csv", &["ACME,3001,UT-1,Mant,Poda,Este,30"]),
        sheet(
            "b.csv",
            &["ACME,3001,UT-1,Mant,Poda,Este,30", "ACME,3002,UT-1,Mant,Poda,Este,30"],
        ),
    ];

    let summary = import_files(&repo, &CsvRowSource::default(), &uploads_dir, &files).await?;
    assert_eq!(summary.imported, 2);
    assert_eq!(
        summary.files.iter().map(|f| f.imported).collect::<Vec<_>>(),
        vec![1, 1]
    );
    Ok(())
}

#[tokio::test]
async fn deleting_an_imported_upload_removes_its_copy() -> Result<(), CoreError> {
    let dir = tempdir().expect("tempdir");
    let repo = FileRepository::open(dir.path()).await?;
    let uploads_dir = dir.path().join("uploads");

    let file = sheet("borrar.csv", &["ACME,4001,UT-1,Mant,Poda,Oeste,40"]);
    let report = import_file(&repo, &CsvRowSource::default(), &uploads_dir, &file).await?;
    let stored = report.stored_path.clone().expect("copy kept");

    let removed = cuadrillas_core::uploads::delete_upload(&repo, &report.upload_id).await?;
    assert_eq!(removed.upload_id, report.upload_id);
    assert!(!Path::new(&stored).exists());
    assert!(repo.list_tasks_by_cuadrilla("Oeste").await?.is_empty());

    match cuadrillas_core::uploads::delete_upload(&repo, &report.upload_id).await {
        Err(CoreError::NotFound(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn rejected_batch_record_leaves_no_tasks_or_copy() -> Result<(), CoreError> {
    let dir = tempdir().expect("tempdir");
    let repo = FileRepository::open(dir.path()).await?;
    let uploads_dir = dir.path().join("uploads");
    std::fs::create_dir(dir.path().join(format!("{UPLOADS_FILE}.tmp"))).expect("block uploads");

    let file = sheet("lunes.csv", &["ACME,5001,UT-1,Mant,Poda,Centro,50"]);
    match import_file(&repo, &CsvRowSource::default(), &uploads_dir, &file).await {
        Err(CoreError::Repository(RepositoryError::Insert(_))) => {}
        other => panic!("unexpected result: {other:?}"),
    }

    assert!(repo.list_tasks_by_cuadrilla("Centro").await?.is_empty());
    assert!(repo.list_uploads().await?.is_empty());
    assert_eq!(stored_copies(&uploads_dir), 0);
    Ok(())
}

#[tokio::test]
async fn failed_task_write_removes_the_batch_again() -> Result<(), CoreError> {
    let dir = tempdir().expect("tempdir");
    let repo = FileRepository::open(dir.path()).await?;
    let uploads_dir = dir.path().join("uploads");
    std::fs::create_dir(dir.path().join(format!("{TASKS_FILE}.tmp"))).expect("block tasks");

    let file = sheet("martes.csv", &["ACME,6001,UT-1,Mant,Poda,Centro,60"]);
    match import_file(&repo, &CsvRowSource::default(), &uploads_dir, &file).await {
        Err(CoreError::Repository(RepositoryError::Io { .. })) => {}
        other => panic!("unexpected result: {other:?}"),
    }

    assert!(repo.list_uploads().await?.is_empty());
    assert!(repo.list_tasks_by_cuadrilla("Centro").await?.is_empty());
    assert_eq!(stored_copies(&uploads_dir), 0);
    Ok(())
}
