//! Municipal real-estate valuation pipeline: ingests listing and historical
//! records, derives features, trains a random-forest valuation model and ranks
//! neighborhoods by predicted valuation change.

pub mod config;
pub mod error;
pub mod features;
pub mod ingestion;
pub mod pipeline;
pub mod publish;
pub mod ranking;
pub mod staging;
pub mod table;
pub mod telemetry;
pub mod valuation;

pub use error::AppError;
pub use pipeline::{PipelineError, SourceBinding, SourceKind, ValuationPipeline};
