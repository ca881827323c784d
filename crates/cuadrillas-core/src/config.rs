//! Process configuration, read once at startup from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use cuadrillas_bucket::S3Config;

use crate::error::{CoreError, Result};

pub const DEFAULT_DATA_DIR: &str = "local_data";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_WAREHOUSE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    File,
    Warehouse,
}

impl FromStr for BackendKind {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "file" | "local" => Ok(Self::File),
            "warehouse" | "postgres" => Ok(Self::Warehouse),
            other => Err(CoreError::Configuration(format!(
                "unknown backend '{other}' (expected 'file' or 'warehouse')"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: BackendKind,
    pub data_dir: PathBuf,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub warehouse_timeout: Duration,
    /// `None` when `BUCKET_NAME` is unset; photo uploads are then rejected.
    pub bucket: Option<S3Config>,
}

impl AppConfig {
    /// Loads `.env` (if present) and reads the process environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let backend = match get("CUADRILLAS_BACKEND") {
            Some(value) => value.parse()?,
            None => BackendKind::File,
        };

        let data_dir = get("CUADRILLAS_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let database_url = get("DATABASE_URL").or_else(|| get("CUADRILLAS_DATABASE_URL"));

        let max_connections = parse_number(
            "CUADRILLAS_DB_MAX_CONNECTIONS",
            get("CUADRILLAS_DB_MAX_CONNECTIONS"),
            DEFAULT_MAX_CONNECTIONS,
        )?;
        let timeout_secs = parse_number(
            "CUADRILLAS_WAREHOUSE_TIMEOUT_SECS",
            get("CUADRILLAS_WAREHOUSE_TIMEOUT_SECS"),
            DEFAULT_WAREHOUSE_TIMEOUT_SECS,
        )?;

        let bucket = get("BUCKET_NAME").map(|bucket| {
            let defaults = S3Config::default();
            S3Config {
                bucket,
                region: get("BUCKET_REGION").unwrap_or(defaults.region),
                force_path_style: get("BUCKET_ENDPOINT").is_some(),
                endpoint: get("BUCKET_ENDPOINT"),
                access_key_id: get("BUCKET_ACCESS_KEY"),
                secret_access_key: get("BUCKET_SECRET_KEY"),
                public_base_url: get("BUCKET_PUBLIC_BASE_URL"),
                public_read: defaults.public_read,
            }
        });

        if backend == BackendKind::Warehouse && database_url.is_none() {
            return Err(CoreError::Configuration(
                "DATABASE_URL (or CUADRILLAS_DATABASE_URL) must be set for the warehouse backend"
                    .into(),
            ));
        }

        Ok(Self {
            backend,
            data_dir,
            database_url,
            max_connections,
            warehouse_timeout: Duration::from_secs(timeout_secs),
            bucket,
        })
    }

    /// Where copies of imported spreadsheets are kept.
    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }
}

fn parse_number<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T> {
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CoreError::Configuration(format!("{key} must be a number, got '{raw}'"))),
        None => Ok(default),
    }
}
