//! Turns the raw listing (and optional historical) datasets into the analysis
//! table the valuation model trains on.

mod historical;
mod normalizer;

pub use historical::HISTORICAL_VALUE_COLUMN;
pub use normalizer::normalize_key;

use crate::ingestion::TAG_MUNICIPALITY;
use crate::table::{parse_number, Table, TableError};
use historical::HistoricalIndex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Columns every listing dataset must carry.
pub const REQUIRED_LISTING_COLUMNS: [&str; 4] = ["preco", "area_m2", "bairro", "ano_construcao"];

/// Column order of the derived artifact.
pub const DERIVED_COLUMNS: [&str; 8] = [
    "municipio",
    "bairro",
    "preco",
    "area_m2",
    "ano_construcao",
    "preco_por_m2",
    "eh_novo",
    "indice_historico",
];

/// Buildings from this year on count as new construction.
pub const NEW_CONSTRUCTION_CUTOFF: i32 = 2015;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedRow {
    pub municipio: String,
    pub bairro: String,
    pub preco: f64,
    pub area_m2: f64,
    pub ano_construcao: Option<i32>,
    pub preco_por_m2: f64,
    pub eh_novo: Option<u8>,
    pub indice_historico: Option<f64>,
}

/// Rows dropped (or degraded) during derivation, per reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionCounts {
    pub missing_price: usize,
    pub non_positive_price: usize,
    pub missing_area: usize,
    pub non_positive_area: usize,
    /// Kept rows whose construction year could not be read; `eh_novo` is empty.
    pub unknown_construction_year: usize,
    /// Historical cells with no usable number.
    pub unusable_historical_values: usize,
}

impl ExclusionCounts {
    pub fn excluded_rows(&self) -> usize {
        self.missing_price + self.non_positive_price + self.missing_area + self.non_positive_area
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DerivedDataset {
    pub rows: Vec<DerivedRow>,
    pub exclusions: ExclusionCounts,
    /// Join key used for `indice_historico`, when enrichment ran.
    pub historical_key: Option<&'static str>,
}

impl DerivedDataset {
    pub fn to_table(&self) -> Result<Table, TableError> {
        Table::from_records(&DERIVED_COLUMNS, &self.rows)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeatureError {
    #[error("dataset '{dataset}' is missing required column '{column}'")]
    MissingRequiredColumn { dataset: String, column: String },
    #[error("no rows left after deriving features")]
    EmptyDataset,
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Named listing dataset handed to [`derive`].
#[derive(Debug, Clone, Copy)]
pub struct ListingInput<'a> {
    pub dataset: &'a str,
    pub table: &'a Table,
}

pub fn derive(
    listings: &[ListingInput<'_>],
    historical: Option<&Table>,
) -> Result<DerivedDataset, FeatureError> {
    for input in listings {
        if let Some(column) = input.table.missing_column(&REQUIRED_LISTING_COLUMNS) {
            return Err(FeatureError::MissingRequiredColumn {
                dataset: input.dataset.to_string(),
                column: column.to_string(),
            });
        }
    }

    let index = historical.and_then(HistoricalIndex::build);
    let mut exclusions = ExclusionCounts {
        unusable_historical_values: index.as_ref().map_or(0, |index| index.skipped_values),
        ..ExclusionCounts::default()
    };

    let mut rows = Vec::new();
    for input in listings {
        derive_rows(input.table, index.as_ref(), &mut exclusions, &mut rows);
    }

    log_exclusions(&exclusions);
    if rows.is_empty() {
        return Err(FeatureError::EmptyDataset);
    }
    info!(
        rows = rows.len(),
        excluded = exclusions.excluded_rows(),
        historical_key = index.as_ref().map(|index| index.key_column),
        "features derived"
    );

    Ok(DerivedDataset {
        rows,
        exclusions,
        historical_key: index.map(|index| index.key_column),
    })
}

fn derive_rows(
    table: &Table,
    index: Option<&HistoricalIndex>,
    exclusions: &mut ExclusionCounts,
    out: &mut Vec<DerivedRow>,
) {
    let cell = |row: usize, column: &str| table.value(row, column).unwrap_or("");

    for row in 0..table.len() {
        let preco = match parse_number(cell(row, "preco")) {
            None => {
                exclusions.missing_price += 1;
                continue;
            }
            Some(value) if value <= 0.0 => {
                exclusions.non_positive_price += 1;
                continue;
            }
            Some(value) => value,
        };
        let area_m2 = match parse_number(cell(row, "area_m2")) {
            None => {
                exclusions.missing_area += 1;
                continue;
            }
            Some(value) if value <= 0.0 => {
                exclusions.non_positive_area += 1;
                continue;
            }
            Some(value) => value,
        };

        let ano_construcao = parse_year(cell(row, "ano_construcao"));
        if ano_construcao.is_none() {
            exclusions.unknown_construction_year += 1;
        }

        let bairro = normalize_key(cell(row, "bairro"));
        let municipio = cell(row, TAG_MUNICIPALITY).to_string();
        let indice_historico = index.and_then(|index| index.lookup(&bairro, &municipio));

        out.push(DerivedRow {
            municipio,
            bairro,
            preco,
            area_m2,
            ano_construcao,
            preco_por_m2: preco / area_m2,
            eh_novo: ano_construcao.map(|year| u8::from(year >= NEW_CONSTRUCTION_CUTOFF)),
            indice_historico,
        });
    }
}

fn parse_year(cell: &str) -> Option<i32> {
    parse_number(cell)
        .filter(|value| value.fract() == 0.0 && (0.0..=9999.0).contains(value))
        .map(|value| value as i32)
}

fn log_exclusions(exclusions: &ExclusionCounts) {
    if exclusions.excluded_rows() > 0 {
        warn!(
            missing_price = exclusions.missing_price,
            non_positive_price = exclusions.non_positive_price,
            missing_area = exclusions.missing_area,
            non_positive_area = exclusions.non_positive_area,
            "listing rows excluded"
        );
    }
    if exclusions.unknown_construction_year > 0 {
        warn!(
            rows = exclusions.unknown_construction_year,
            "construction year unreadable; eh_novo left empty"
        );
    }
}
