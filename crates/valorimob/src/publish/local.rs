use super::{LoadMode, ObjectStore, SinkError, Warehouse};
use crate::staging::atomic_write;
use crate::table::Table;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

/// Object store mirror on the local filesystem: `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, SinkError> {
        let relative = Path::new(bucket).join(key);
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if bucket.is_empty() || key.is_empty() || escapes {
            return Err(SinkError::Rejected(format!(
                "object path '{bucket}/{key}' is not allowed"
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put_object(&self, bucket: &str, key: &str, payload: Vec<u8>) -> Result<(), SinkError> {
        let path = self.object_path(bucket, key)?;
        tokio::task::spawn_blocking(move || atomic_write(&path, &payload))
            .await
            .map_err(|err| SinkError::Rejected(format!("object write aborted: {err}")))??;
        Ok(())
    }
}

/// Warehouse stand-in keeping each table as `<root>/<table_id>.csv`.
#[derive(Debug, Clone)]
pub struct LocalWarehouse {
    root: PathBuf,
}

impl LocalWarehouse {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn table_path(&self, table_id: &str) -> PathBuf {
        self.root.join(format!("{table_id}.csv"))
    }
}

#[async_trait]
impl Warehouse for LocalWarehouse {
    async fn load(&self, table_id: &str, table: &Table, mode: LoadMode) -> Result<(), SinkError> {
        let LoadMode::Overwrite = mode;
        if table_id.is_empty() || table_id.contains(['/', '\\']) || table_id.starts_with('.') {
            return Err(SinkError::Rejected(format!(
                "table id '{table_id}' is not allowed"
            )));
        }

        let payload = table
            .to_csv_bytes()
            .map_err(|err| SinkError::Rejected(err.to_string()))?;
        let path = self.table_path(table_id);
        tokio::task::spawn_blocking(move || atomic_write(&path, &payload))
            .await
            .map_err(|err| SinkError::Rejected(format!("table load aborted: {err}")))??;
        Ok(())
    }
}
