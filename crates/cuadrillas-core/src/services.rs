use std::path::PathBuf;
use std::sync::Arc;

use cuadrillas_bucket::{BucketStore, S3BucketStore};
use cuadrillas_repository::{FileRepository, TrackingRepository, WarehouseRepository};
use tracing::info;

use crate::config::{AppConfig, BackendKind};
use crate::error::{CoreError, Result};

/// Storage handles built once at startup and handed to every operation.
#[derive(Clone)]
pub struct Services {
    pub repository: Arc<dyn TrackingRepository>,
    pub bucket: Option<Arc<dyn BucketStore>>,
    pub uploads_dir: PathBuf,
}

impl Services {
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let repository = open_repository(config).await?;
        let bucket = open_bucket(config).await?;
        Ok(Self {
            repository,
            bucket,
            uploads_dir: config.uploads_dir(),
        })
    }

    pub fn bucket(&self) -> Option<&dyn BucketStore> {
        self.bucket.as_deref()
    }
}

pub async fn open_repository(config: &AppConfig) -> Result<Arc<dyn TrackingRepository>> {
    match config.backend {
        BackendKind::File => {
            let repository = FileRepository::open(&config.data_dir).await?;
            Ok(Arc::new(repository))
        }
        BackendKind::Warehouse => {
            let database_url = config.database_url.as_deref().ok_or_else(|| {
                CoreError::Configuration("DATABASE_URL must be set for the warehouse backend".into())
            })?;
            let repository = WarehouseRepository::connect(
                database_url,
                config.max_connections,
                config.warehouse_timeout,
            )
            .await?;
            repository.run_migrations().await?;
            info!("warehouse repository connected and migrated");
            Ok(Arc::new(repository))
        }
    }
}

pub async fn open_bucket(config: &AppConfig) -> Result<Option<Arc<dyn BucketStore>>> {
    match &config.bucket {
        Some(bucket_config) => {
            let store = S3BucketStore::new(bucket_config.clone()).await?;
            Ok(Some(Arc::new(store)))
        }
        None => Ok(None),
    }
}
