//! Pushes staged artifacts to the durable external sinks.
//!
//! Both sinks only support full replacement (truncate-and-load), so publishing
//! the same staged artifact twice leaves the sinks exactly as one publish would.

mod local;
mod memory;

pub use local::{LocalObjectStore, LocalWarehouse};
pub use memory::{InMemoryObjectStore, InMemoryWarehouse};

use crate::staging::{Artifact, StagingError, StagingStore};
use crate::table::Table;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Write disposition for warehouse loads. Overwrite is the only one supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Overwrite,
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink rejected the write: {0}")]
    Rejected(String),
    #[error("sink I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, bucket: &str, key: &str, payload: Vec<u8>) -> Result<(), SinkError>;
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn load(&self, table_id: &str, table: &Table, mode: LoadMode) -> Result<(), SinkError>;
}

/// Destinations and bounds for publishing.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub bucket: String,
    pub prefix: String,
    pub project: String,
    pub dataset: String,
    pub timeout: Duration,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            bucket: "valorimob".to_string(),
            prefix: "valorimob/".to_string(),
            project: "valorimob".to_string(),
            dataset: "valorimob".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error("publishing '{artifact}' to {target} failed: {reason}")]
    PublishFailure {
        artifact: String,
        target: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub artifact: String,
    pub object_uri: String,
    pub table_id: Option<String>,
    pub rows: Option<usize>,
}

pub struct Publisher {
    staging: Arc<dyn StagingStore>,
    objects: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
    config: PublishConfig,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Publisher {
    pub fn new(
        staging: Arc<dyn StagingStore>,
        objects: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
        config: PublishConfig,
    ) -> Self {
        Self {
            staging,
            objects,
            warehouse,
            config,
        }
    }

    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    pub fn object_key(&self, name: &str) -> String {
        format!("{}{}", self.config.prefix, name)
    }

    pub fn table_id(&self, table: &str) -> String {
        format!("{}.{}.{}", self.config.project, self.config.dataset, table)
    }

    /// Publishes the staged artifact: object store always, warehouse when the
    /// artifact names a table.
    pub async fn publish(&self, artifact: Artifact) -> Result<PublishReceipt, PublishError> {
        // One read feeds both sinks so they always see the same snapshot.
        let payload = self.staging.get_bytes(artifact.name)?;
        let table = match artifact.table {
            Some(_) => Some(Table::from_csv_bytes(&payload).map_err(|source| {
                StagingError::Codec {
                    name: artifact.name.to_string(),
                    source,
                }
            })?),
            None => None,
        };
        let key = self.object_key(artifact.name);
        let object_uri = format!("s3://{}/{}", self.config.bucket, key);

        self.bounded(
            artifact.name,
            &object_uri,
            self.objects.put_object(&self.config.bucket, &key, payload),
        )
        .await?;
        info!(artifact = artifact.name, uri = %object_uri, "artifact uploaded to object store");

        let (Some(table_name), Some(table)) = (artifact.table, table) else {
            return Ok(PublishReceipt {
                artifact: artifact.name.to_string(),
                object_uri,
                table_id: None,
                rows: None,
            });
        };

        let table_id = self.table_id(table_name);
        self.bounded(
            artifact.name,
            &table_id,
            self.warehouse.load(&table_id, &table, LoadMode::Overwrite),
        )
        .await?;
        info!(artifact = artifact.name, table_id = %table_id, rows = table.len(), "warehouse table overwritten");

        Ok(PublishReceipt {
            artifact: artifact.name.to_string(),
            object_uri,
            table_id: Some(table_id),
            rows: Some(table.len()),
        })
    }

    async fn bounded<F>(
        &self,
        artifact: &str,
        destination: &str,
        call: F,
    ) -> Result<(), PublishError>
    where
        F: Future<Output = Result<(), SinkError>>,
    {
        let failure = |reason: String| {
            warn!(artifact, destination, %reason, "publish failed");
            PublishError::PublishFailure {
                artifact: artifact.to_string(),
                target: destination.to_string(),
                reason,
            }
        };

        match tokio::time::timeout(self.config.timeout, call).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(failure(err.to_string())),
            Err(_) => Err(failure(format!(
                "timed out after {}s",
                self.config.timeout.as_secs_f64()
            ))),
        }
    }
}
