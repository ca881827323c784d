pub mod config;
pub mod error;
pub mod import;
pub mod ingest;
pub mod report;
pub mod services;
pub mod uploads;

pub use config::{AppConfig, BackendKind};
pub use error::{CoreError, Result};
pub use import::{import_file, import_files, ImportFile, ImportReport, ImportSummary};
pub use ingest::{CsvRowSource, RowSource, SheetRows};
pub use report::{record_event, EventReport, PhotoAttachment};
pub use services::Services;
