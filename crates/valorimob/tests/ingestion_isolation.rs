use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use valorimob::ingestion::{
    IngestionConfig, IngestionCoordinator, IngestionStatus, Municipality, PartitionSpec, RawBatch,
    SourceAdapter, SourceError,
};
use valorimob::staging::{InMemoryStagingStore, StagingStore};
use valorimob::table::Table;

/// Each partition sleeps for its scripted delay before answering.
struct DelayedSource {
    delays: HashMap<String, Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl DelayedSource {
    fn new(delays: &[(&str, u64)]) -> Self {
        Self {
            delays: delays
                .iter()
                .map(|(name, millis)| (name.to_string(), Duration::from_millis(*millis)))
                .collect(),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SourceAdapter for DelayedSource {
    fn source_id(&self) -> &str {
        "imoveis"
    }

    fn partitions(&self) -> Vec<PartitionSpec> {
        let mut names: Vec<&String> = self.delays.keys().collect();
        names.sort();
        names
            .into_iter()
            .enumerate()
            .map(|(code, name)| {
                PartitionSpec::municipality("imoveis", &Municipality::new(name.as_str(), code as u32))
            })
            .collect()
    }

    async fn fetch(&self, partition: &PartitionSpec) -> Result<RawBatch, SourceError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = self.delays[&partition.key.municipality];
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut table = Table::new(["bairro", "preco"]);
        table
            .push_row(vec![
                format!("{}-centro", partition.key.municipality),
                "100000".to_string(),
            ])
            .expect("row width");
        Ok(RawBatch::new(table))
    }
}

fn config(timeout_secs: u64, concurrency: usize) -> IngestionConfig {
    IngestionConfig {
        fetch_timeout: Duration::from_secs(timeout_secs),
        max_concurrent_fetches: concurrency,
    }
}

#[tokio::test(start_paused = true)]
async fn timed_out_partition_is_unavailable_and_others_succeed() {
    let staging = Arc::new(InMemoryStagingStore::new());
    let source = Arc::new(DelayedSource::new(&[
        ("Antonina", 100),
        ("Guaratuba", 120_000),
        ("Paranagua", 200),
    ]));

    let report = IngestionCoordinator::new(staging.clone(), config(30, 4))
        .ingest(source, "imoveis.csv")
        .await
        .expect("partial success");

    assert_eq!(report.status(), IngestionStatus::Degraded);
    assert_eq!(report.rows, 2);
    assert_eq!(report.failed.len(), 1);
    let failure = &report.failed[0];
    assert_eq!(failure.partition.key.municipality, "Guaratuba");
    assert!(matches!(failure.reason, SourceError::Unavailable(_)));
    assert!(staging.contains("imoveis.csv"));
}

#[tokio::test(start_paused = true)]
async fn output_does_not_depend_on_completion_order() {
    let forward = Arc::new(InMemoryStagingStore::new());
    let reverse = Arc::new(InMemoryStagingStore::new());

    IngestionCoordinator::new(forward.clone(), config(30, 4))
        .ingest(
            Arc::new(DelayedSource::new(&[("A", 10), ("B", 20), ("C", 30)])),
            "imoveis.csv",
        )
        .await
        .expect("forward");
    IngestionCoordinator::new(reverse.clone(), config(30, 4))
        .ingest(
            Arc::new(DelayedSource::new(&[("A", 30), ("B", 20), ("C", 10)])),
            "imoveis.csv",
        )
        .await
        .expect("reverse");

    assert_eq!(
        forward.get_bytes("imoveis.csv").expect("forward bytes"),
        reverse.get_bytes("imoveis.csv").expect("reverse bytes")
    );
    let staged = forward.get("imoveis.csv").expect("table");
    assert_eq!(staged.value(0, "municipio"), Some("A"));
    assert_eq!(staged.value(2, "municipio"), Some("C"));
    assert_eq!(staged.value(0, "fonte"), Some("imoveis"));
    assert_eq!(staged.value(0, "ano"), Some(""));
}

#[tokio::test(start_paused = true)]
async fn concurrency_is_bounded() {
    let staging = Arc::new(InMemoryStagingStore::new());
    let source = Arc::new(DelayedSource::new(&[
        ("A", 50),
        ("B", 50),
        ("C", 50),
        ("D", 50),
        ("E", 50),
    ]));

    let report = IngestionCoordinator::new(staging, config(30, 2))
        .ingest(source.clone(), "imoveis.csv")
        .await
        .expect("ingested");

    assert_eq!(report.status(), IngestionStatus::Complete);
    assert_eq!(report.succeeded.len(), 5);
    assert!(source.peak_in_flight.load(Ordering::SeqCst) <= 2);
}
