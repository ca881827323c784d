use std::path::PathBuf;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use cuadrillas_core::config::BackendKind;
use cuadrillas_core::services::open_repository;
use cuadrillas_core::{
    import_files, record_event, uploads, AppConfig, CsvRowSource, EventReport, ImportFile,
    PhotoAttachment, Services,
};
use cuadrillas_repository::{Event, Task, TrackingRepository, UploadBatch};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Crew task tracking tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import task spreadsheets (CSV exports) as new upload batches
    Import(ImportArgs),
    /// List the tasks assigned to a crew
    Tasks(TasksArgs),
    /// Show one task with its event history
    Task(TaskArgs),
    /// List the events of a task, oldest first
    Events(TaskArgs),
    /// Record a field report for a task
    Report(ReportArgs),
    /// Latest event of every visible task
    Dashboard(OutputArgs),
    /// Inspect and manage upload batches
    #[command(subcommand)]
    Uploads(UploadsCommand),
    /// Apply warehouse migrations
    Migrate,
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Files to import, in order
    #[arg(required = true)]
    files: Vec<PathBuf>,
    /// Field delimiter of the exports
    #[arg(long, default_value_t = ',')]
    delimiter: char,
}

#[derive(Args, Debug)]
struct TasksArgs {
    #[arg(long)]
    cuadrilla: String,
}

#[derive(Args, Debug)]
struct TaskArgs {
    task_id: String,
}

#[derive(Args, Debug)]
struct ReportArgs {
    #[arg(long)]
    task_id: String,
    #[arg(long)]
    event_type: String,
    #[arg(long, default_value = "")]
    ot: String,
    #[arg(long, default_value = "")]
    cuadrilla: String,
    #[arg(long, default_value = "")]
    id_cuadrilla: String,
    /// RFC 3339 timestamp; defaults to now
    #[arg(long)]
    event_time: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    lon: Option<f64>,
    #[arg(long)]
    accuracy_m: Option<f64>,
    #[arg(long)]
    pause_reason: Option<String>,
    #[arg(long)]
    comment: Option<String>,
    /// Photo to attach (needs BUCKET_NAME)
    #[arg(long)]
    photo: Option<PathBuf>,
    #[arg(long)]
    content_type: Option<String>,
}

#[derive(Args, Debug, Default)]
struct OutputArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum UploadsCommand {
    /// List uploads, newest first
    List(OutputArgs),
    /// Make an upload's tasks visible again
    Enable(UploadArgs),
    /// Hide an upload's tasks from crews and the dashboard
    Disable(UploadArgs),
    /// Delete an upload, its tasks and their events
    Delete(UploadArgs),
}

#[derive(Args, Debug)]
struct UploadArgs {
    upload_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load().context("failed to read configuration")?;

    if let Command::Migrate = cli.command {
        return handle_migrate(&config).await;
    }

    let services = Services::from_config(&config)
        .await
        .context("failed to open storage")?;

    match cli.command {
        Command::Import(args) => handle_import(&services, args).await,
        Command::Tasks(args) => {
            let tasks = services
                .repository
                .list_tasks_by_cuadrilla(&args.cuadrilla)
                .await?;
            print_json(&tasks)
        }
        Command::Task(args) => handle_task(&services, &args.task_id).await,
        Command::Events(args) => {
            let events = services.repository.list_events_by_task(&args.task_id).await?;
            print_json(&events)
        }
        Command::Report(args) => handle_report(&services, args).await,
        Command::Dashboard(args) => {
            let events = services.repository.dashboard_latest().await?;
            if args.json {
                print_json(&events)
            } else {
                println!("{}", dashboard_table(&events));
                Ok(())
            }
        }
        Command::Uploads(command) => handle_uploads(&services, command).await,
        Command::Migrate => Ok(()),
    }
}

async fn handle_migrate(config: &AppConfig) -> Result<()> {
    if config.backend == BackendKind::File {
        println!("The file backend has no migrations.");
        return Ok(());
    }
    open_repository(config)
        .await
        .context("failed to migrate the warehouse")?;
    println!("Warehouse migrations applied.");
    Ok(())
}

async fn handle_import(services: &Services, args: ImportArgs) -> Result<()> {
    let delimiter = u8::try_from(args.delimiter)
        .context("the delimiter must be a single-byte character")?;

    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let contents = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        files.push(ImportFile { filename, contents });
    }

    let summary = import_files(
        services.repository.as_ref(),
        &CsvRowSource::with_delimiter(delimiter),
        &services.uploads_dir,
        &files,
    )
    .await?;
    info!(files = summary.files.len(), imported = summary.imported, "import finished");
    print_json(&summary)
}

async fn handle_task(services: &Services, task_id: &str) -> Result<()> {
    #[derive(Serialize)]
    struct TaskView {
        task: Task,
        events: Vec<Event>,
    }

    let task = uploads::require_task(services.repository.as_ref(), task_id).await?;
    let events = services.repository.list_events_by_task(task_id).await?;
    print_json(&TaskView { task, events })
}

async fn handle_report(services: &Services, args: ReportArgs) -> Result<()> {
    let photo = match &args.photo {
        Some(path) => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            Some(PhotoAttachment {
                bytes: Bytes::from(bytes),
                content_type: args.content_type.clone(),
                filename: path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned()),
            })
        }
        None => None,
    };

    let report = EventReport {
        task_id: args.task_id,
        ot: args.ot,
        cuadrilla: args.cuadrilla,
        id_cuadrilla: args.id_cuadrilla,
        event_type: args.event_type,
        event_time: args.event_time,
        lat: args.lat,
        lon: args.lon,
        accuracy_m: args.accuracy_m,
        pause_reason: args.pause_reason,
        comment: args.comment,
    };

    let event = record_event(
        services.repository.as_ref(),
        services.bucket(),
        report,
        photo,
    )
    .await?;
    print_json(&event)
}

async fn handle_uploads(services: &Services, command: UploadsCommand) -> Result<()> {
    let repository = services.repository.as_ref();
    match command {
        UploadsCommand::List(args) => {
            let batches = repository.list_uploads().await?;
            if args.json {
                print_json(&batches)
            } else {
                println!("{}", uploads_table(&batches));
                Ok(())
            }
        }
        UploadsCommand::Enable(args) => {
            uploads::set_upload_active(repository, &args.upload_id, true).await?;
            println!("Upload {} enabled.", args.upload_id);
            Ok(())
        }
        UploadsCommand::Disable(args) => {
            uploads::set_upload_active(repository, &args.upload_id, false).await?;
            println!("Upload {} disabled.", args.upload_id);
            Ok(())
        }
        UploadsCommand::Delete(args) => {
            let removed = uploads::delete_upload(repository, &args.upload_id).await?;
            println!("Deleted upload {} ({}).", removed.upload_id, removed.filename);
            Ok(())
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn dashboard_table(events: &[Event]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "OT",
        "Cuadrilla",
        "ID Cuadrilla",
        "Evento",
        "Hora",
        "Comentario",
        "Foto",
    ]);
    for event in events {
        table.add_row(vec![
            event.ot.clone(),
            event.cuadrilla.clone(),
            event.id_cuadrilla.clone(),
            event.event_type.clone(),
            event.event_time.clone(),
            event.comment.clone().unwrap_or_default(),
            event.photo_url.clone().unwrap_or_default(),
        ]);
    }
    table
}

fn uploads_table(batches: &[UploadBatch]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Upload",
        "Archivo",
        "Filas",
        "Fecha",
        "Activo",
    ]);
    for batch in batches {
        table.add_row(vec![
            batch.upload_id.clone(),
            batch.filename.clone(),
            batch.rows_imported.to_string(),
            batch.uploaded_at.clone(),
            if batch.active { "sí" } else { "no" }.to_string(),
        ]);
    }
    table
}
