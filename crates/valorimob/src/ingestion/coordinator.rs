use super::partition::{PartitionSpec, RawBatch, SourceError};
use super::sources::SourceAdapter;
use crate::staging::{StagingError, StagingStore};
use crate::table::Table;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Bounds applied to every partition fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionConfig {
    pub fetch_timeout: Duration,
    pub max_concurrent_fetches: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            max_concurrent_fetches: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFailure {
    pub partition: PartitionSpec,
    pub reason: SourceError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionStatus {
    /// Every declared partition was fetched.
    Complete,
    /// Some partitions failed; the dataset was still published.
    Degraded,
}

/// Outcome of a successful ingestion run for one source.
#[derive(Debug, Clone)]
pub struct IngestionReport {
    pub source: String,
    pub dataset: String,
    pub rows: usize,
    pub succeeded: Vec<PartitionSpec>,
    pub failed: Vec<PartitionFailure>,
}

impl IngestionReport {
    pub fn status(&self) -> IngestionStatus {
        if self.failed.is_empty() {
            IngestionStatus::Complete
        } else {
            IngestionStatus::Degraded
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("source '{source_id}' produced no rows ({} of {attempted} partitions failed)", failures.len())]
    EmptyDataset {
        source_id: String,
        attempted: usize,
        failures: Vec<PartitionFailure>,
    },
    #[error(transparent)]
    Staging(#[from] StagingError),
}

/// Fetches every partition of a source, keeps whatever succeeded, and stages
/// the merged raw dataset.
pub struct IngestionCoordinator {
    staging: Arc<dyn StagingStore>,
    config: IngestionConfig,
}

impl IngestionCoordinator {
    pub fn new(staging: Arc<dyn StagingStore>, config: IngestionConfig) -> Self {
        Self { staging, config }
    }

    pub async fn ingest(
        &self,
        adapter: Arc<dyn SourceAdapter>,
        dataset: &str,
    ) -> Result<IngestionReport, IngestionError> {
        let source_id = adapter.source_id().to_string();
        let partitions = adapter.partitions();
        let attempted = partitions.len();
        info!(source = %source_id, partitions = attempted, "ingestion started");

        let outcomes = self.fetch_all(adapter, partitions).await;

        let mut batches = Vec::new();
        let mut failed = Vec::new();
        for (partition, outcome) in outcomes {
            match outcome {
                Ok(batch) => batches.push((partition, batch)),
                Err(reason) => {
                    warn!(
                        source = %partition.source,
                        partition = %partition,
                        kind = reason.kind(),
                        %reason,
                        "partition skipped"
                    );
                    failed.push(PartitionFailure { partition, reason });
                }
            }
        }

        // Completion order varies between runs; merge in key order instead.
        batches.sort_by(|left, right| left.0.cmp(&right.0));
        failed.sort_by(|left, right| left.partition.cmp(&right.partition));

        let mut merged = Table::default();
        let mut succeeded = Vec::with_capacity(batches.len());
        for (partition, batch) in batches {
            merged.append(batch.into_tagged(&partition));
            succeeded.push(partition);
        }

        if merged.is_empty() {
            error!(
                source = %source_id,
                attempted,
                failed = failed.len(),
                "no rows ingested; nothing staged"
            );
            return Err(IngestionError::EmptyDataset {
                source_id,
                attempted,
                failures: failed,
            });
        }

        self.staging.put(dataset, &merged)?;

        let report = IngestionReport {
            source: source_id,
            dataset: dataset.to_string(),
            rows: merged.len(),
            succeeded,
            failed,
        };

        match report.status() {
            IngestionStatus::Complete => info!(
                source = %report.source,
                dataset,
                rows = report.rows,
                partitions = report.succeeded.len(),
                "raw dataset staged"
            ),
            IngestionStatus::Degraded => warn!(
                source = %report.source,
                dataset,
                rows = report.rows,
                succeeded = report.succeeded.len(),
                failed = report.failed.len(),
                "raw dataset staged with missing partitions"
            ),
        }

        Ok(report)
    }

    async fn fetch_all(
        &self,
        adapter: Arc<dyn SourceAdapter>,
        partitions: Vec<PartitionSpec>,
    ) -> Vec<(PartitionSpec, Result<RawBatch, SourceError>)> {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_fetches.max(1)));
        let timeout = self.config.fetch_timeout;
        let mut tasks = JoinSet::new();

        for partition in partitions.iter().cloned() {
            let adapter = Arc::clone(&adapter);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => fetch_with_timeout(adapter.as_ref(), &partition, timeout).await,
                    Err(_) => Err(SourceError::Unavailable("fetch pool closed".to_string())),
                };
                (partition, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(partitions.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => error!(%err, "partition fetch task aborted"),
            }
        }

        // A panicking adapter loses its partition with the task; report it.
        let reported: BTreeSet<PartitionSpec> = outcomes
            .iter()
            .map(|(partition, _)| partition.clone())
            .collect();
        for partition in partitions {
            if !reported.contains(&partition) {
                outcomes.push((
                    partition,
                    Err(SourceError::Unavailable("fetch task aborted".to_string())),
                ));
            }
        }

        outcomes
    }
}

async fn fetch_with_timeout(
    adapter: &dyn SourceAdapter,
    partition: &PartitionSpec,
    timeout: Duration,
) -> Result<RawBatch, SourceError> {
    match tokio::time::timeout(timeout, adapter.fetch(partition)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(SourceError::Unavailable(format!(
            "timed out after {}s",
            timeout.as_secs_f64()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::partition::Municipality;
    use crate::staging::InMemoryStagingStore;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct ScriptedSource {
        partitions: Vec<PartitionSpec>,
        outcomes: HashMap<String, Result<Vec<&'static str>, SourceError>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<(&str, Result<Vec<&'static str>, SourceError>)>) -> Self {
            let partitions = script
                .iter()
                .enumerate()
                .map(|(index, (name, _))| {
                    PartitionSpec::municipality("imoveis", &Municipality::new(*name, index as u32))
                })
                .collect();
            let outcomes = script
                .into_iter()
                .map(|(name, outcome)| (name.to_string(), outcome))
                .collect();
            Self {
                partitions,
                outcomes,
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for ScriptedSource {
        fn source_id(&self) -> &str {
            "imoveis"
        }

        fn partitions(&self) -> Vec<PartitionSpec> {
            self.partitions.clone()
        }

        async fn fetch(&self, partition: &PartitionSpec) -> Result<RawBatch, SourceError> {
            let outcome = self
                .outcomes
                .get(&partition.key.municipality)
                .cloned()
                .expect("scripted partition");
            outcome.map(|neighborhoods| {
                let mut table = Table::new(["bairro"]);
                for neighborhood in neighborhoods {
                    table.push_row(vec![neighborhood.to_string()]).unwrap();
                }
                RawBatch::new(table)
            })
        }
    }

    fn coordinator(staging: Arc<InMemoryStagingStore>) -> IngestionCoordinator {
        IngestionCoordinator::new(staging, IngestionConfig::default())
    }

    #[tokio::test]
    async fn partial_failure_is_reported_and_dataset_staged() {
        let staging = Arc::new(InMemoryStagingStore::new());
        let source = Arc::new(ScriptedSource::new(vec![
            ("Paranagua", Ok(vec!["Centro", "Rocio"])),
            ("Matinhos", Err(SourceError::Absent("no export".into()))),
            ("Pontal", Ok(vec!["Shangri-la"])),
        ]));

        let report = coordinator(staging.clone())
            .ingest(source, "imoveis.csv")
            .await
            .expect("ingestion succeeds");

        assert_eq!(report.status(), IngestionStatus::Degraded);
        assert_eq!(report.rows, 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].partition.key.municipality, "Matinhos");
        assert_eq!(report.succeeded.len(), 2);

        let staged = staging.get("imoveis.csv").expect("staged");
        assert_eq!(staged.len(), 3);
        assert_eq!(staged.value(2, "municipio"), Some("Pontal"));
    }

    #[tokio::test]
    async fn all_partitions_failing_stages_nothing() {
        let staging = Arc::new(InMemoryStagingStore::new());
        let source = Arc::new(ScriptedSource::new(vec![
            ("Paranagua", Err(SourceError::Unavailable("reset".into()))),
            ("Pontal", Err(SourceError::Malformed("bad csv".into()))),
        ]));

        let err = coordinator(staging.clone())
            .ingest(source, "imoveis.csv")
            .await
            .expect_err("empty dataset");

        match err {
            IngestionError::EmptyDataset {
                attempted,
                failures,
                ..
            } => {
                assert_eq!(attempted, 2);
                assert_eq!(failures.len(), 2);
            }
            other => panic!("expected empty dataset, got {other:?}"),
        }
        assert!(!staging.contains("imoveis.csv"));
    }

    #[tokio::test]
    async fn failed_run_leaves_previous_artifact_untouched() {
        let staging = Arc::new(InMemoryStagingStore::new());
        let good = Arc::new(ScriptedSource::new(vec![("Paranagua", Ok(vec!["Centro"]))]));
        coordinator(staging.clone())
            .ingest(good, "imoveis.csv")
            .await
            .expect("first run");
        let before = staging.get_bytes("imoveis.csv").expect("bytes");

        let bad = Arc::new(ScriptedSource::new(vec![(
            "Paranagua",
            Err(SourceError::Unavailable("down".into())),
        )]));
        assert!(coordinator(staging.clone())
            .ingest(bad, "imoveis.csv")
            .await
            .is_err());

        assert_eq!(staging.get_bytes("imoveis.csv").expect("bytes"), before);
    }

    #[tokio::test]
    async fn zero_row_partitions_count_as_empty() {
        let staging = Arc::new(InMemoryStagingStore::new());
        let source = Arc::new(ScriptedSource::new(vec![("Paranagua", Ok(Vec::new()))]));

        let err = coordinator(staging)
            .ingest(source, "imoveis.csv")
            .await
            .expect_err("no rows");
        assert!(matches!(err, IngestionError::EmptyDataset { .. }));
    }
}
