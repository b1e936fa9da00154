use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use valorimob::config::AppConfig;
use valorimob::error::AppError;
use valorimob::ingestion::{ListingRegistrySource, SidraSource};
use valorimob::publish::{LocalObjectStore, LocalWarehouse, Publisher};
use valorimob::staging::{LocalStagingStore, StagingStore};
use valorimob::{SourceBinding, SourceKind, ValuationPipeline};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) staging: Arc<dyn StagingStore>,
}

pub(crate) fn local_staging(config: &AppConfig) -> Arc<dyn StagingStore> {
    Arc::new(LocalStagingStore::new(&config.staging.dir))
}

/// Wires the configured sources and local sinks into a pipeline. Listings are
/// required; the historical series only enriches and may be skipped.
pub(crate) fn build_pipeline(config: &AppConfig) -> Result<ValuationPipeline, AppError> {
    let staging = local_staging(config);
    let publisher = Publisher::new(
        Arc::clone(&staging),
        Arc::new(LocalObjectStore::new(&config.publish.object_store_dir)),
        Arc::new(LocalWarehouse::new(&config.publish.warehouse_dir)),
        config.publish.target.clone(),
    );

    let listings = ListingRegistrySource::new(
        &config.sources.listings_dir,
        config.sources.municipalities.clone(),
    );
    let historical = SidraSource::new(
        config.sources.sidra.clone(),
        config.sources.municipalities.clone(),
        config.sources.years.clone(),
        config.ingestion.fetch_timeout,
    )?;

    let sources = vec![
        SourceBinding::required(SourceKind::Listings, Arc::new(listings)),
        SourceBinding::optional(SourceKind::Historical, Arc::new(historical)),
    ];

    Ok(ValuationPipeline::new(
        staging,
        publisher,
        sources,
        config.ingestion.clone(),
        config.model.clone(),
    ))
}
