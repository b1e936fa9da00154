//! Groups scored rows by neighborhood and ranks neighborhoods by predicted
//! valuation change.

use crate::table::{parse_number, Table, TableError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Group used for every row when the scored table has no neighborhood column.
pub const UNKNOWN_NEIGHBORHOOD: &str = "desconhecido";

/// Column order of the ranking artifact read by the dashboard.
pub const RANKING_COLUMNS: [&str; 4] = [
    "bairro",
    "valorizacao_absoluta",
    "valorizacao_percentual",
    "qtde_imoveis",
];

const NEIGHBORHOOD_COLUMN: &str = "bairro";
const ACTUAL_COLUMN: &str = "preco_real";
const PREDICTED_COLUMN: &str = "preco_previsto";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingRow {
    pub bairro: String,
    pub valorizacao_absoluta: f64,
    /// Empty when no row of the group has a non-zero actual price.
    pub valorizacao_percentual: Option<f64>,
    pub qtde_imoveis: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankingExclusions {
    pub empty_neighborhood: usize,
    pub unparsable_price: usize,
    /// Rows kept in the absolute mean but left out of the percentage mean.
    pub zero_actual_price: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankingTable {
    pub rows: Vec<RankingRow>,
    pub exclusions: RankingExclusions,
    /// Set when the input had no `bairro` column and everything went to
    /// [`UNKNOWN_NEIGHBORHOOD`].
    pub neighborhood_column_missing: bool,
}

impl RankingTable {
    pub fn to_table(&self) -> Result<Table, TableError> {
        Table::from_records(&RANKING_COLUMNS, &self.rows)
    }

    pub fn top(&self, limit: usize) -> &[RankingRow] {
        &self.rows[..limit.min(self.rows.len())]
    }
}

/// Aggregates over a set of ranking rows, as shown next to the dashboard table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingSummary {
    pub neighborhoods: usize,
    pub mean_percentual: Option<f64>,
    pub total_imoveis: usize,
}

impl RankingSummary {
    pub fn of(rows: &[RankingRow]) -> Self {
        let percentages: Vec<f64> = rows
            .iter()
            .filter_map(|row| row.valorizacao_percentual)
            .collect();
        let mean_percentual = if percentages.is_empty() {
            None
        } else {
            Some(percentages.iter().sum::<f64>() / percentages.len() as f64)
        };
        Self {
            neighborhoods: rows.len(),
            mean_percentual,
            total_imoveis: rows.iter().map(|row| row.qtde_imoveis).sum(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RankingError {
    #[error("scored dataset is missing required column '{0}'")]
    MissingRequiredColumn(String),
    #[error("scored dataset has no usable rows")]
    EmptyDataset,
    #[error(transparent)]
    Table(#[from] TableError),
}

#[derive(Default)]
struct Group {
    count: usize,
    delta_sum: f64,
    pct_sum: f64,
    pct_count: usize,
}

pub fn rank(scored: &Table) -> Result<RankingTable, RankingError> {
    for column in [ACTUAL_COLUMN, PREDICTED_COLUMN] {
        if !scored.has_column(column) {
            return Err(RankingError::MissingRequiredColumn(column.to_string()));
        }
    }
    if scored.is_empty() {
        return Err(RankingError::EmptyDataset);
    }

    let neighborhood_column_missing = !scored.has_column(NEIGHBORHOOD_COLUMN);
    if neighborhood_column_missing {
        warn!(
            group = UNKNOWN_NEIGHBORHOOD,
            "scored dataset has no bairro column; ranking a single group"
        );
    }

    let mut exclusions = RankingExclusions::default();
    let mut groups: BTreeMap<String, Group> = BTreeMap::new();
    for row in 0..scored.len() {
        let neighborhood = if neighborhood_column_missing {
            UNKNOWN_NEIGHBORHOOD.to_string()
        } else {
            scored
                .value(row, NEIGHBORHOOD_COLUMN)
                .unwrap_or("")
                .trim()
                .to_string()
        };
        if neighborhood.is_empty() {
            exclusions.empty_neighborhood += 1;
            continue;
        }

        let actual = scored.value(row, ACTUAL_COLUMN).and_then(parse_number);
        let predicted = scored.value(row, PREDICTED_COLUMN).and_then(parse_number);
        let (Some(actual), Some(predicted)) = (actual, predicted) else {
            exclusions.unparsable_price += 1;
            continue;
        };

        let group = groups.entry(neighborhood).or_default();
        group.count += 1;
        group.delta_sum += predicted - actual;
        if actual == 0.0 {
            exclusions.zero_actual_price += 1;
        } else {
            group.pct_sum += (predicted / actual - 1.0) * 100.0;
            group.pct_count += 1;
        }
    }

    if groups.is_empty() {
        warn!(
            empty_neighborhood = exclusions.empty_neighborhood,
            unparsable_price = exclusions.unparsable_price,
            "every scored row was excluded"
        );
        return Err(RankingError::EmptyDataset);
    }

    let mut rows: Vec<RankingRow> = groups
        .into_iter()
        .map(|(bairro, group)| RankingRow {
            bairro,
            valorizacao_absoluta: group.delta_sum / group.count as f64,
            valorizacao_percentual: (group.pct_count > 0)
                .then(|| group.pct_sum / group.pct_count as f64),
            qtde_imoveis: group.count,
        })
        .collect();
    rows.sort_by(compare_rows);

    if exclusions != RankingExclusions::default() {
        warn!(
            empty_neighborhood = exclusions.empty_neighborhood,
            unparsable_price = exclusions.unparsable_price,
            zero_actual_price = exclusions.zero_actual_price,
            "scored rows excluded from ranking"
        );
    }
    info!(neighborhoods = rows.len(), "ranking built");

    Ok(RankingTable {
        rows,
        exclusions,
        neighborhood_column_missing,
    })
}

/// Percentage descending with empty percentages last, then name ascending.
fn compare_rows(left: &RankingRow, right: &RankingRow) -> Ordering {
    let by_percentage = match (left.valorizacao_percentual, right.valorizacao_percentual) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_percentage.then_with(|| left.bairro.cmp(&right.bairro))
}

/// Reads a staged ranking artifact back into typed rows.
pub fn rows_from_table(table: &Table) -> Result<Vec<RankingRow>, RankingError> {
    if let Some(column) = table.missing_column(&RANKING_COLUMNS) {
        return Err(RankingError::MissingRequiredColumn(column.to_string()));
    }
    Ok(table.to_records()?)
}
