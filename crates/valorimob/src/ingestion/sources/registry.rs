use super::SourceAdapter;
use crate::ingestion::partition::{Municipality, PartitionSpec, RawBatch, SourceError};
use crate::table::Table;
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use tracing::debug;

/// Property listings exported per municipality as `<dir>/<municipio>.csv`.
#[derive(Debug, Clone)]
pub struct ListingRegistrySource {
    source_id: String,
    dir: PathBuf,
    municipalities: Vec<Municipality>,
}

impl ListingRegistrySource {
    pub const SOURCE_ID: &'static str = "imoveis";

    pub fn new(dir: impl Into<PathBuf>, municipalities: Vec<Municipality>) -> Self {
        Self {
            source_id: Self::SOURCE_ID.to_string(),
            dir: dir.into(),
            municipalities,
        }
    }

    fn file_for(&self, partition: &PartitionSpec) -> PathBuf {
        self.dir
            .join(format!("{}.csv", partition.key.municipality))
    }
}

#[async_trait]
impl SourceAdapter for ListingRegistrySource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn partitions(&self) -> Vec<PartitionSpec> {
        self.municipalities
            .iter()
            .map(|municipality| PartitionSpec::municipality(&self.source_id, municipality))
            .collect()
    }

    async fn fetch(&self, partition: &PartitionSpec) -> Result<RawBatch, SourceError> {
        let path = self.file_for(partition);
        debug!(partition = %partition, path = %path.display(), "reading listing export");

        let payload = tokio::fs::read(&path).await.map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => SourceError::Absent(path.display().to_string()),
            _ => SourceError::Unavailable(format!("{}: {err}", path.display())),
        })?;

        let records = Table::from_export_bytes(&payload)
            .map_err(|err| SourceError::Malformed(format!("{}: {err}", path.display())))?;
        Ok(RawBatch::new(records))
    }
}
