mod registry;
mod sidra;

pub use registry::ListingRegistrySource;
pub use sidra::{SidraConfig, SidraSource};

use super::partition::{PartitionSpec, RawBatch, SourceError};
use async_trait::async_trait;

/// An adapter could not be constructed. Unlike [`SourceError`] this is not
/// tied to a partition and aborts before any fetch is attempted.
#[derive(Debug, thiserror::Error)]
pub enum SourceSetupError {
    #[error("HTTP client for source '{source_id}' could not be built: {source}")]
    HttpClient {
        source_id: &'static str,
        source: reqwest::Error,
    },
}

/// One upstream data source. Adapters fetch a single partition per call and
/// never retry; the coordinator decides what a failure means for the run.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &str;

    /// Partitions this source declares for the run, enumerated upfront.
    fn partitions(&self) -> Vec<PartitionSpec>;

    async fn fetch(&self, partition: &PartitionSpec) -> Result<RawBatch, SourceError>;
}
