//! Valuation model: trains a random forest on the derived table and scores the
//! held-out rows.

mod forest;
mod metrics;
mod split;

pub use forest::{ForestError, ForestParams, RandomForestRegressor, RegressionTree};
pub use metrics::RegressionMetrics;

use crate::table::{parse_number, Table, TableError};
use serde::{Deserialize, Serialize};
use split::train_test_split;
use tracing::{info, warn};

/// Feature order the model is trained and scored with.
pub const FEATURE_COLUMNS: [&str; 3] = ["area_m2", "preco_por_m2", "eh_novo"];
pub const TARGET_COLUMN: &str = "preco";

/// Column order of the scored artifact.
pub const SCORED_COLUMNS: [&str; 6] = [
    "bairro",
    "area_m2",
    "preco_por_m2",
    "eh_novo",
    "preco_real",
    "preco_previsto",
];

const REQUIRED_COLUMNS: [&str; 3] = ["preco", "area_m2", "preco_por_m2"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub seed: u64,
    pub test_ratio: f64,
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            test_ratio: 0.2,
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

impl ModelConfig {
    fn forest_params(&self) -> ForestParams {
        ForestParams {
            n_estimators: self.n_estimators,
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            seed: self.seed,
        }
    }
}

/// How a missing feature value is filled before prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Imputation {
    Constant { value: f64 },
}

impl Imputation {
    fn fill(&self, value: Option<f64>) -> f64 {
        match self {
            Imputation::Constant { value: fallback } => value.unwrap_or(*fallback),
        }
    }
}

/// Everything needed to reproduce a prediction. Carries no timestamps, so a
/// retrain on identical inputs serializes to identical bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub features: Vec<String>,
    pub target: String,
    pub imputation: Imputation,
    pub params: ModelConfig,
    pub training_rows: usize,
    pub metrics: RegressionMetrics,
    pub forest: RandomForestRegressor,
}

impl ModelArtifact {
    /// Predicts a price from features given in [`ModelArtifact::features`] order.
    pub fn predict(&self, features: &[Option<f64>]) -> Result<f64, ForestError> {
        let row: Vec<f64> = features
            .iter()
            .map(|value| self.imputation.fill(*value))
            .collect();
        self.forest.predict(&row)
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRow {
    pub bairro: String,
    pub area_m2: f64,
    pub preco_por_m2: f64,
    pub eh_novo: Option<u8>,
    pub preco_real: f64,
    pub preco_previsto: f64,
}

#[derive(Debug, Clone)]
pub struct ValuationOutcome {
    pub model: ModelArtifact,
    pub scored: Vec<ScoredRow>,
    /// Derived rows dropped for lacking price, area or price per area.
    pub dropped_rows: usize,
}

impl ValuationOutcome {
    pub fn scored_table(&self) -> Result<Table, TableError> {
        Table::from_records(&SCORED_COLUMNS, &self.scored)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ValuationError {
    #[error("derived dataset is missing required column '{0}'")]
    MissingRequiredColumn(String),
    #[error("not enough usable rows to train and evaluate: {usable} usable, test ratio {test_ratio}")]
    EmptyDataset { usable: usize, test_ratio: f64 },
    #[error("invalid model configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Forest(#[from] ForestError),
    #[error("model artifact could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Table(#[from] TableError),
}

struct TrainingRow {
    bairro: String,
    area_m2: f64,
    preco_por_m2: f64,
    eh_novo: Option<u8>,
    preco: f64,
}

impl TrainingRow {
    fn features(&self) -> [Option<f64>; 3] {
        [
            Some(self.area_m2),
            Some(self.preco_por_m2),
            self.eh_novo.map(f64::from),
        ]
    }
}

/// Trains on a seeded shuffle split of `derived` and scores the held-out rows.
pub fn fit_and_score(derived: &Table, config: &ModelConfig) -> Result<ValuationOutcome, ValuationError> {
    if !(config.test_ratio > 0.0 && config.test_ratio < 1.0) {
        return Err(ValuationError::InvalidConfig(format!(
            "test ratio {} is outside (0, 1)",
            config.test_ratio
        )));
    }
    if let Some(column) = derived.missing_column(&REQUIRED_COLUMNS) {
        return Err(ValuationError::MissingRequiredColumn(column.to_string()));
    }

    let (rows, dropped_rows) = training_rows(derived);
    if dropped_rows > 0 {
        warn!(dropped_rows, "derived rows without price, area or price per area dropped");
    }

    let split = train_test_split(rows.len(), config.test_ratio, config.seed).ok_or(
        ValuationError::EmptyDataset {
            usable: rows.len(),
            test_ratio: config.test_ratio,
        },
    )?;

    let imputation = Imputation::Constant { value: 0.0 };
    let matrix = |indices: &[usize]| -> Vec<Vec<f64>> {
        indices
            .iter()
            .map(|&index| {
                rows[index]
                    .features()
                    .iter()
                    .map(|value| imputation.fill(*value))
                    .collect()
            })
            .collect()
    };
    let train_features = matrix(&split.train);
    let train_targets: Vec<f64> = split.train.iter().map(|&index| rows[index].preco).collect();

    let forest = RandomForestRegressor::fit(&train_features, &train_targets, &config.forest_params())?;

    let test_features = matrix(&split.test);
    let predictions = test_features
        .iter()
        .map(|row| forest.predict(row))
        .collect::<Result<Vec<f64>, _>>()?;
    let actual: Vec<f64> = split.test.iter().map(|&index| rows[index].preco).collect();
    let metrics = RegressionMetrics::compute(&actual, &predictions);

    info!(
        train = split.train.len(),
        test = split.test.len(),
        trees = config.n_estimators,
        mse = metrics.mse,
        r2 = metrics.r2,
        explained_variance = metrics.explained_variance,
        "valuation model trained"
    );

    let scored = split
        .test
        .iter()
        .zip(&predictions)
        .map(|(&index, &preco_previsto)| {
            let row = &rows[index];
            ScoredRow {
                bairro: row.bairro.clone(),
                area_m2: row.area_m2,
                preco_por_m2: row.preco_por_m2,
                eh_novo: row.eh_novo,
                preco_real: row.preco,
                preco_previsto,
            }
        })
        .collect();

    let model = ModelArtifact {
        features: FEATURE_COLUMNS.iter().map(|name| name.to_string()).collect(),
        target: TARGET_COLUMN.to_string(),
        imputation,
        params: config.clone(),
        training_rows: split.train.len(),
        metrics,
        forest,
    };

    Ok(ValuationOutcome {
        model,
        scored,
        dropped_rows,
    })
}

fn training_rows(derived: &Table) -> (Vec<TrainingRow>, usize) {
    let cell = |row: usize, column: &str| derived.value(row, column).unwrap_or("");
    let mut rows = Vec::with_capacity(derived.len());
    let mut dropped = 0;

    for row in 0..derived.len() {
        let parsed = (
            parse_number(cell(row, TARGET_COLUMN)),
            parse_number(cell(row, "area_m2")),
            parse_number(cell(row, "preco_por_m2")),
        );
        let (Some(preco), Some(area_m2), Some(preco_por_m2)) = parsed else {
            dropped += 1;
            continue;
        };
        let eh_novo = parse_number(cell(row, "eh_novo"))
            .filter(|flag| *flag == 0.0 || *flag == 1.0)
            .map(|flag| flag as u8);

        rows.push(TrainingRow {
            bairro: cell(row, "bairro").to_string(),
            area_m2,
            preco_por_m2,
            eh_novo,
            preco,
        });
    }

    (rows, dropped)
}
