use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use valorimob::ingestion::{IngestionConfig, ListingRegistrySource, Municipality};
use valorimob::pipeline::{load_ranking, SourceOutcome};
use valorimob::publish::{LocalObjectStore, LocalWarehouse, PublishConfig, Publisher};
use valorimob::ranking::{RANKING_COLUMNS, UNKNOWN_NEIGHBORHOOD};
use valorimob::staging::{LocalStagingStore, StagingStore};
use valorimob::valuation::ModelConfig;
use valorimob::{SourceBinding, SourceKind, ValuationPipeline};

const NEIGHBORHOODS: [&str; 4] = ["Centro", "Rocio", "Costeira", " Vila\u{feff} Guarani "];

fn write_listings(dir: &Path, municipality: &str, rows: usize, offset: usize) {
    let mut csv = String::from("\u{feff}preco,area_m2,bairro,ano_construcao,quartos\n");
    for i in 0..rows {
        let n = i + offset;
        let area = 45 + (n % 6) * 15;
        let per_m2 = 2800 + (n % 4) * 450 + (n % 3) * 120;
        let year = if n % 9 == 0 {
            String::new()
        } else {
            (1990 + n % 33).to_string()
        };
        csv.push_str(&format!(
            "{},{},\"{}\",{},{}\n",
            area * per_m2,
            area,
            NEIGHBORHOODS[n % NEIGHBORHOODS.len()],
            year,
            1 + n % 4
        ));
    }
    // Unusable rows that must be excluded during derivation.
    csv.push_str("0,50,Centro,2000,2\n");
    csv.push_str(",70,Rocio,2001,3\n");
    fs::create_dir_all(dir).expect("listings dir");
    fs::write(dir.join(format!("{municipality}.csv")), csv).expect("listings file");
}

struct Workspace {
    _root: TempDir,
    listings: std::path::PathBuf,
    staging: std::path::PathBuf,
    objects: std::path::PathBuf,
    warehouse: std::path::PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let path = root.path().to_path_buf();
        Self {
            listings: path.join("raw/imoveis"),
            staging: path.join("processed"),
            objects: path.join("object-store"),
            warehouse: path.join("warehouse"),
            _root: root,
        }
    }

    fn pipeline(&self, municipalities: Vec<Municipality>) -> ValuationPipeline {
        let staging: Arc<dyn StagingStore> = Arc::new(LocalStagingStore::new(&self.staging));
        let publisher = Publisher::new(
            Arc::clone(&staging),
            Arc::new(LocalObjectStore::new(&self.objects)),
            Arc::new(LocalWarehouse::new(&self.warehouse)),
            PublishConfig::default(),
        );
        let source = ListingRegistrySource::new(&self.listings, municipalities);
        ValuationPipeline::new(
            staging,
            publisher,
            vec![SourceBinding::required(SourceKind::Listings, Arc::new(source))],
            IngestionConfig::default(),
            ModelConfig {
                n_estimators: 12,
                ..ModelConfig::default()
            },
        )
    }
}

fn municipalities() -> Vec<Municipality> {
    vec![
        Municipality::new("Paranagua", 4117700),
        Municipality::new("Pontal_do_Parana", 4118203),
        Municipality::new("Matinhos", 4115705),
    ]
}

#[tokio::test]
async fn full_run_stages_publishes_and_ranks() {
    let workspace = Workspace::new();
    write_listings(&workspace.listings, "Paranagua", 40, 0);
    write_listings(&workspace.listings, "Pontal_do_Parana", 25, 7);

    let pipeline = workspace.pipeline(municipalities());
    let summary = pipeline.run().await.expect("run succeeds");

    match &summary.sources[0] {
        SourceOutcome::Ingested { report, .. } => {
            assert_eq!(report.rows, 69);
            assert_eq!(report.failed.len(), 1);
            assert_eq!(report.failed[0].partition.key.municipality, "Matinhos");
            assert_eq!(report.failed[0].reason.kind(), "absent");
        }
        other => panic!("listings should be ingested, got {other:?}"),
    }
    assert_eq!(summary.derived_rows, 65);
    assert_eq!(summary.excluded_rows, 4);
    assert_eq!(summary.scored_rows, 13);

    let ranking = load_ranking(pipeline.staging().as_ref()).expect("ranking staged");
    assert!(!ranking.is_empty());
    assert!(ranking.iter().all(|row| row.qtde_imoveis >= 1));
    assert!(ranking.iter().all(|row| row.bairro != UNKNOWN_NEIGHBORHOOD));
    let known = ["centro", "rocio", "costeira", "vila guarani"];
    assert!(ranking.iter().all(|row| known.contains(&row.bairro.as_str())));
    assert_eq!(
        ranking.iter().map(|row| row.qtde_imoveis).sum::<usize>(),
        summary.scored_rows
    );
    for pair in ranking.windows(2) {
        match (pair[0].valorizacao_percentual, pair[1].valorizacao_percentual) {
            (Some(a), Some(b)) => {
                assert!(a > b || (a == b && pair[0].bairro < pair[1].bairro))
            }
            (None, Some(_)) => panic!("empty percentage sorted before a value"),
            _ => {}
        }
    }

    let warehouse_ranking = fs::read_to_string(
        workspace
            .warehouse
            .join("valorimob.valorimob.ranking_bairros.csv"),
    )
    .expect("warehouse table");
    assert!(warehouse_ranking.starts_with(&RANKING_COLUMNS.join(",")));
    assert!(workspace
        .objects
        .join("valorimob/valorimob/modelo_valorizacao.json")
        .exists());
    assert!(!workspace
        .warehouse
        .join("valorimob.valorimob.modelo_valorizacao.csv")
        .exists());
}

#[tokio::test]
async fn reruns_with_the_same_seed_are_byte_identical() {
    let workspace = Workspace::new();
    write_listings(&workspace.listings, "Paranagua", 50, 3);
    let pipeline = workspace.pipeline(municipalities());

    pipeline.run().await.expect("first run");
    let staging = pipeline.staging();
    let model = staging.get_bytes("modelo_valorizacao.json").expect("model");
    let scored = staging.get_bytes("predicoes_valorizacao.csv").expect("scored");
    let ranking = staging.get_bytes("ranking_bairros.csv").expect("ranking");

    pipeline.run().await.expect("second run");
    assert_eq!(staging.get_bytes("modelo_valorizacao.json").expect("model"), model);
    assert_eq!(staging.get_bytes("predicoes_valorizacao.csv").expect("scored"), scored);
    assert_eq!(staging.get_bytes("ranking_bairros.csv").expect("ranking"), ranking);

    let published = fs::read(
        workspace
            .objects
            .join("valorimob/valorimob/ranking_bairros.csv"),
    )
    .expect("published ranking");
    assert_eq!(published, ranking);
}

#[tokio::test]
async fn stages_can_be_rerun_individually() {
    let workspace = Workspace::new();
    write_listings(&workspace.listings, "Paranagua", 30, 0);
    let pipeline = workspace.pipeline(municipalities());

    pipeline.ingest(None).await.expect("ingest");
    let derived = pipeline.derive().await.expect("derive");
    assert_eq!(derived.output.historical_key, None);
    pipeline.train().await.expect("train");
    let first = pipeline.rank().await.expect("rank");
    let second = pipeline.rank().await.expect("rank again");

    assert_eq!(first.output.rows, second.output.rows);
}

#[tokio::test]
async fn all_listing_partitions_missing_stages_nothing() {
    let workspace = Workspace::new();
    let pipeline = workspace.pipeline(municipalities());

    let err = pipeline.run().await.expect_err("no listings at all");
    assert!(err.to_string().contains("produced no rows"));
    assert!(!workspace.staging.join("imoveis.csv").exists());
}
