//! Multi-source ingestion with per-partition failure isolation.

mod coordinator;
mod partition;
pub mod sources;

pub use coordinator::{
    IngestionConfig, IngestionCoordinator, IngestionError, IngestionReport, IngestionStatus,
    PartitionFailure,
};
pub use partition::{
    Municipality, PartitionKey, PartitionSpec, RawBatch, SourceError, TAG_MUNICIPALITY,
    TAG_SOURCE, TAG_YEAR,
};
pub use sources::{
    ListingRegistrySource, SidraConfig, SidraSource, SourceAdapter, SourceSetupError,
};
