// crates/cuadrillas-core/src/error.rs

use cuadrillas_bucket::BucketError;
use cuadrillas_repository::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Blob storage error: {0}")]
    Bucket(#[from] BucketError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
