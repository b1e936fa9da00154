//! Stage runner. Each stage reads only the previous stage's staged artifact,
//! stages its own output, then publishes it; any stage can be re-run alone.

use crate::features::{self, DerivedDataset, FeatureError, ListingInput};
use crate::ingestion::{
    IngestionConfig, IngestionCoordinator, IngestionError, IngestionReport, SourceAdapter,
};
use crate::publish::{PublishError, PublishReceipt, Publisher};
use crate::ranking::{self, RankingError, RankingRow, RankingTable};
use crate::staging::{artifacts, Artifact, StagingError, StagingStore};
use crate::table::TableError;
use crate::valuation::{self, ModelConfig, RegressionMetrics, ValuationError, ValuationOutcome};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Rows shown in the run summary, as on the dashboard.
pub const SUMMARY_TOP_N: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Listings,
    Historical,
}

impl SourceKind {
    pub fn artifact(self) -> Artifact {
        match self {
            SourceKind::Listings => artifacts::RAW_LISTINGS,
            SourceKind::Historical => artifacts::RAW_HISTORICAL,
        }
    }
}

/// An adapter wired to the raw artifact it feeds.
#[derive(Clone)]
pub struct SourceBinding {
    pub kind: SourceKind,
    pub adapter: Arc<dyn SourceAdapter>,
    /// A required source with no rows fails the stage; an optional one is
    /// skipped and the previously staged snapshot (if any) stays in place.
    pub required: bool,
}

impl SourceBinding {
    pub fn required(kind: SourceKind, adapter: Arc<dyn SourceAdapter>) -> Self {
        Self {
            kind,
            adapter,
            required: true,
        }
    }

    pub fn optional(kind: SourceKind, adapter: Arc<dyn SourceAdapter>) -> Self {
        Self {
            kind,
            adapter,
            required: false,
        }
    }
}

impl std::fmt::Debug for SourceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceBinding")
            .field("kind", &self.kind)
            .field("source", &self.adapter.source_id())
            .field("required", &self.required)
            .finish()
    }
}

#[derive(Debug)]
pub enum SourceOutcome {
    Ingested {
        report: IngestionReport,
        receipt: PublishReceipt,
    },
    Skipped {
        kind: SourceKind,
        reason: String,
    },
}

/// Output of one stage plus what it published.
#[derive(Debug)]
pub struct Staged<T> {
    pub output: T,
    pub receipts: Vec<PublishReceipt>,
}

#[derive(Debug)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceOutcome>,
    pub derived_rows: usize,
    pub excluded_rows: usize,
    pub scored_rows: usize,
    pub metrics: RegressionMetrics,
    pub neighborhoods: usize,
    pub top: Vec<RankingRow>,
    pub published: Vec<PublishReceipt>,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("ingestion failed: {0}")]
    Ingestion(#[from] IngestionError),
    #[error("staging failed: {0}")]
    Staging(#[from] StagingError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("feature derivation failed: {0}")]
    Features(#[from] FeatureError),
    #[error("valuation failed: {0}")]
    Valuation(#[from] ValuationError),
    #[error("ranking failed: {0}")]
    Ranking(#[from] RankingError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("model training task did not complete: {0}")]
    TrainingTask(#[from] tokio::task::JoinError),
}

impl PipelineError {
    /// True when the stage failed because an upstream artifact was never staged.
    pub fn is_artifact_missing(&self) -> bool {
        matches!(
            self,
            PipelineError::Staging(StagingError::ArtifactNotFound(_))
                | PipelineError::Ingestion(IngestionError::Staging(
                    StagingError::ArtifactNotFound(_)
                ))
                | PipelineError::Publish(PublishError::Staging(StagingError::ArtifactNotFound(_)))
        )
    }
}

pub struct ValuationPipeline {
    staging: Arc<dyn StagingStore>,
    publisher: Publisher,
    sources: Vec<SourceBinding>,
    ingestion: IngestionConfig,
    model: ModelConfig,
}

impl std::fmt::Debug for ValuationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValuationPipeline")
            .field("publisher", &self.publisher)
            .field("sources", &self.sources)
            .field("ingestion", &self.ingestion)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ValuationPipeline {
    pub fn new(
        staging: Arc<dyn StagingStore>,
        publisher: Publisher,
        sources: Vec<SourceBinding>,
        ingestion: IngestionConfig,
        model: ModelConfig,
    ) -> Self {
        Self {
            staging,
            publisher,
            sources,
            ingestion,
            model,
        }
    }

    pub fn staging(&self) -> &Arc<dyn StagingStore> {
        &self.staging
    }

    /// Ingests every bound source, or only those of `only` when given.
    pub async fn ingest(&self, only: Option<SourceKind>) -> Result<Vec<SourceOutcome>, PipelineError> {
        let coordinator = IngestionCoordinator::new(Arc::clone(&self.staging), self.ingestion.clone());
        let mut outcomes = Vec::new();

        for binding in self
            .sources
            .iter()
            .filter(|binding| only.map_or(true, |kind| kind == binding.kind))
        {
            let artifact = binding.kind.artifact();
            match coordinator
                .ingest(Arc::clone(&binding.adapter), artifact.name)
                .await
            {
                Ok(report) => {
                    let receipt = self.publisher.publish(artifact).await?;
                    outcomes.push(SourceOutcome::Ingested { report, receipt });
                }
                Err(err @ IngestionError::EmptyDataset { .. }) if !binding.required => {
                    warn!(
                        source = binding.adapter.source_id(),
                        artifact = artifact.name,
                        error = %err,
                        "optional source produced no rows; keeping previous snapshot"
                    );
                    outcomes.push(SourceOutcome::Skipped {
                        kind: binding.kind,
                        reason: err.to_string(),
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(outcomes)
    }

    pub async fn derive(&self) -> Result<Staged<DerivedDataset>, PipelineError> {
        let listings = self.staging.get(artifacts::RAW_LISTINGS.name)?;
        let historical = match self.staging.get(artifacts::RAW_HISTORICAL.name) {
            Ok(table) => Some(table),
            Err(StagingError::ArtifactNotFound(name)) => {
                warn!(artifact = %name, "historical dataset not staged; deriving without it");
                None
            }
            Err(err) => return Err(err.into()),
        };

        let derived = features::derive(
            &[ListingInput {
                dataset: artifacts::RAW_LISTINGS.name,
                table: &listings,
            }],
            historical.as_ref(),
        )?;
        self.staging
            .put(artifacts::DERIVED.name, &derived.to_table()?)?;
        let receipt = self.publisher.publish(artifacts::DERIVED).await?;

        Ok(Staged {
            output: derived,
            receipts: vec![receipt],
        })
    }

    pub async fn train(&self) -> Result<Staged<ValuationOutcome>, PipelineError> {
        let derived = self.staging.get(artifacts::DERIVED.name)?;
        let model = self.model.clone();
        let outcome =
            tokio::task::spawn_blocking(move || valuation::fit_and_score(&derived, &model))
                .await??;

        let model_bytes = outcome.model.to_json_bytes().map_err(ValuationError::from)?;
        self.staging.put_bytes(artifacts::MODEL.name, &model_bytes)?;
        self.staging
            .put(artifacts::SCORED.name, &outcome.scored_table()?)?;

        let receipts = vec![
            self.publisher.publish(artifacts::MODEL).await?,
            self.publisher.publish(artifacts::SCORED).await?,
        ];

        Ok(Staged {
            output: outcome,
            receipts,
        })
    }

    pub async fn rank(&self) -> Result<Staged<RankingTable>, PipelineError> {
        let scored = self.staging.get(artifacts::SCORED.name)?;
        let ranking = ranking::rank(&scored)?;
        self.staging
            .put(artifacts::RANKING.name, &ranking.to_table()?)?;
        let receipt = self.publisher.publish(artifacts::RANKING).await?;

        Ok(Staged {
            output: ranking,
            receipts: vec![receipt],
        })
    }

    /// Runs every stage in order, stopping at the first stage-fatal error.
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        let started_at = Utc::now();
        info!(%started_at, "pipeline run started");

        let sources = self.ingest(None).await?;
        let mut published: Vec<PublishReceipt> = sources
            .iter()
            .filter_map(|outcome| match outcome {
                SourceOutcome::Ingested { receipt, .. } => Some(receipt.clone()),
                SourceOutcome::Skipped { .. } => None,
            })
            .collect();

        let derived = self.derive().await?;
        published.extend(derived.receipts);
        let trained = self.train().await?;
        published.extend(trained.receipts);
        let ranked = self.rank().await?;
        published.extend(ranked.receipts);

        let finished_at = Utc::now();
        let summary = RunSummary {
            started_at,
            finished_at,
            sources,
            derived_rows: derived.output.rows.len(),
            excluded_rows: derived.output.exclusions.excluded_rows(),
            scored_rows: trained.output.scored.len(),
            metrics: trained.output.model.metrics.clone(),
            neighborhoods: ranked.output.rows.len(),
            top: ranked.output.top(SUMMARY_TOP_N).to_vec(),
            published,
        };
        info!(
            elapsed_ms = (finished_at - started_at).num_milliseconds(),
            derived_rows = summary.derived_rows,
            scored_rows = summary.scored_rows,
            neighborhoods = summary.neighborhoods,
            "pipeline run finished"
        );
        Ok(summary)
    }
}

/// Reads the staged ranking artifact, as the dashboard does.
pub fn load_ranking(staging: &dyn StagingStore) -> Result<Vec<RankingRow>, PipelineError> {
    let table = staging.get(artifacts::RANKING.name)?;
    Ok(ranking::rows_from_table(&table)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::{Municipality, PartitionSpec, RawBatch, SourceError};
    use crate::publish::{InMemoryObjectStore, InMemoryWarehouse, PublishConfig};
    use crate::staging::InMemoryStagingStore;
    use crate::table::Table;
    use async_trait::async_trait;

    struct FixedSource {
        id: &'static str,
        batch: Result<Table, SourceError>,
    }

    #[async_trait]
    impl SourceAdapter for FixedSource {
        fn source_id(&self) -> &str {
            self.id
        }

        fn partitions(&self) -> Vec<PartitionSpec> {
            vec![PartitionSpec::municipality(
                self.id,
                &Municipality::new("Paranagua", 4117700),
            )]
        }

        async fn fetch(&self, _partition: &PartitionSpec) -> Result<RawBatch, SourceError> {
            self.batch.clone().map(RawBatch::new)
        }
    }

    fn listings_table(rows: usize) -> Table {
        let mut table = Table::new(["preco", "area_m2", "bairro", "ano_construcao"]);
        for i in 0..rows {
            let area = 50 + (i % 5) * 10;
            table
                .push_row(vec![
                    (area * (3000 + (i % 3) * 500)).to_string(),
                    area.to_string(),
                    ["Centro", "Rocio", "Costeira"][i % 3].to_string(),
                    (2005 + i % 15).to_string(),
                ])
                .unwrap();
        }
        table
    }

    fn pipeline(
        staging: Arc<InMemoryStagingStore>,
        sources: Vec<SourceBinding>,
    ) -> (ValuationPipeline, Arc<InMemoryWarehouse>) {
        let warehouse = Arc::new(InMemoryWarehouse::default());
        let publisher = Publisher::new(
            staging.clone(),
            Arc::new(InMemoryObjectStore::default()),
            warehouse.clone(),
            PublishConfig::default(),
        );
        let model = ModelConfig {
            n_estimators: 5,
            ..ModelConfig::default()
        };
        (
            ValuationPipeline::new(staging, publisher, sources, IngestionConfig::default(), model),
            warehouse,
        )
    }

    fn listings_source(rows: usize) -> SourceBinding {
        SourceBinding::required(
            SourceKind::Listings,
            Arc::new(FixedSource {
                id: "imoveis",
                batch: Ok(listings_table(rows)),
            }),
        )
    }

    fn failing_historical() -> SourceBinding {
        SourceBinding::optional(
            SourceKind::Historical,
            Arc::new(FixedSource {
                id: "dados_historicos",
                batch: Err(SourceError::Unavailable("offline".into())),
            }),
        )
    }

    #[tokio::test]
    async fn run_stages_and_publishes_every_artifact() {
        let staging = Arc::new(InMemoryStagingStore::new());
        let (pipeline, warehouse) =
            pipeline(staging.clone(), vec![listings_source(30), failing_historical()]);

        let summary = pipeline.run().await.expect("run succeeds");

        assert!(matches!(summary.sources[1], SourceOutcome::Skipped { .. }));
        assert_eq!(summary.derived_rows, 30);
        assert_eq!(summary.scored_rows, 6);
        assert_eq!(summary.neighborhoods, summary.top.len());
        assert_eq!(summary.published.len(), 5);
        for name in [
            "imoveis.csv",
            "variaveis.csv",
            "modelo_valorizacao.json",
            "predicoes_valorizacao.csv",
            "ranking_bairros.csv",
        ] {
            assert!(staging.contains(name), "{name} staged");
        }
        assert!(warehouse
            .table("valorimob.valorimob.ranking_bairros")
            .is_some());

        let rows = load_ranking(staging.as_ref()).expect("ranking readable");
        assert_eq!(rows, summary.top);
    }

    #[tokio::test]
    async fn required_source_without_rows_fails_the_stage() {
        let staging = Arc::new(InMemoryStagingStore::new());
        let failing = SourceBinding::required(
            SourceKind::Listings,
            Arc::new(FixedSource {
                id: "imoveis",
                batch: Err(SourceError::Absent("no file".into())),
            }),
        );
        let (pipeline, _) = pipeline(staging.clone(), vec![failing]);

        let err = pipeline.ingest(None).await.expect_err("fatal");
        assert!(matches!(
            err,
            PipelineError::Ingestion(IngestionError::EmptyDataset { .. })
        ));
        assert!(!staging.contains("imoveis.csv"));
    }

    #[tokio::test]
    async fn stage_without_upstream_artifact_reports_missing() {
        let staging = Arc::new(InMemoryStagingStore::new());
        let (pipeline, _) = pipeline(staging, Vec::new());

        let err = pipeline.rank().await.expect_err("nothing scored yet");
        assert!(err.is_artifact_missing());
    }

    #[tokio::test]
    async fn ingest_filter_runs_only_the_requested_source() {
        let staging = Arc::new(InMemoryStagingStore::new());
        let (pipeline, _) =
            pipeline(staging.clone(), vec![listings_source(5), failing_historical()]);

        let outcomes = pipeline
            .ingest(Some(SourceKind::Listings))
            .await
            .expect("listings ingested");
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], SourceOutcome::Ingested { .. }));
    }

    #[tokio::test]
    async fn training_leaves_the_runtime_free_for_other_tasks() {
        let staging = Arc::new(InMemoryStagingStore::new());
        let (pipeline, _) = pipeline(staging, vec![listings_source(40)]);
        pipeline.ingest(None).await.expect("ingest");
        pipeline.derive().await.expect("derive");

        let ticked = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ticker = {
            let ticked = Arc::clone(&ticked);
            tokio::spawn(async move { ticked.store(true, std::sync::atomic::Ordering::SeqCst) })
        };

        pipeline.train().await.expect("train");
        assert!(ticked.load(std::sync::atomic::Ordering::SeqCst));
        ticker.await.expect("ticker");
    }

    #[tokio::test]
    async fn rerunning_a_stage_overwrites_its_artifact() {
        let staging = Arc::new(InMemoryStagingStore::new());
        let (pipeline, _) = pipeline(staging.clone(), vec![listings_source(20)]);
        pipeline.ingest(None).await.expect("ingest");

        pipeline.derive().await.expect("first derive");
        let first = staging.get_bytes("variaveis.csv").expect("bytes");
        pipeline.derive().await.expect("second derive");

        assert_eq!(staging.get_bytes("variaveis.csv").expect("bytes"), first);
    }
}
