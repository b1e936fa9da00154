use super::normalizer::normalize_key;
use crate::ingestion::TAG_MUNICIPALITY;
use crate::table::{parse_number, Table};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// SIDRA publishes the series value under `V`.
pub const HISTORICAL_VALUE_COLUMN: &str = "V";

const NEIGHBORHOOD_KEY: &str = "bairro";

/// Mean historical value per normalized join key.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HistoricalIndex {
    pub(crate) key_column: &'static str,
    pub(crate) means: BTreeMap<String, f64>,
    pub(crate) skipped_values: usize,
}

impl HistoricalIndex {
    /// Returns `None` (and logs why) when the table cannot be joined.
    pub(crate) fn build(table: &Table) -> Option<Self> {
        let key_column = if table.has_column(NEIGHBORHOOD_KEY) {
            NEIGHBORHOOD_KEY
        } else if table.has_column(TAG_MUNICIPALITY) {
            TAG_MUNICIPALITY
        } else {
            warn!("historical dataset has no join key column; enrichment skipped");
            return None;
        };
        let Some(value_index) = table.column_index(HISTORICAL_VALUE_COLUMN) else {
            warn!(
                column = HISTORICAL_VALUE_COLUMN,
                "historical dataset has no value column; enrichment skipped"
            );
            return None;
        };
        let key_index = table.column_index(key_column)?;

        let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        let mut skipped_values = 0;
        for row in table.rows() {
            let key = normalize_key(&row[key_index]);
            match parse_number(&row[value_index]) {
                Some(value) if !key.is_empty() => {
                    let entry = sums.entry(key).or_insert((0.0, 0));
                    entry.0 += value;
                    entry.1 += 1;
                }
                _ => skipped_values += 1,
            }
        }

        let means = sums
            .into_iter()
            .map(|(key, (sum, count))| (key, sum / count as f64))
            .collect::<BTreeMap<_, _>>();

        if skipped_values > 0 {
            warn!(skipped_values, "historical values without a usable number or key");
        }
        info!(key_column, groups = means.len(), "historical index built");

        Some(Self {
            key_column,
            means,
            skipped_values,
        })
    }

    pub(crate) fn lookup(&self, neighborhood: &str, municipality: &str) -> Option<f64> {
        let key = if self.key_column == NEIGHBORHOOD_KEY {
            neighborhood
        } else {
            municipality
        };
        self.means.get(&normalize_key(key)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(headers: &[&str], rows: &[&[&str]]) -> Table {
        let mut table = Table::new(headers.iter().copied());
        for row in rows {
            table
                .push_row(row.iter().map(|cell| cell.to_string()).collect())
                .unwrap();
        }
        table
    }

    #[test]
    fn averages_per_municipality_and_skips_placeholders() {
        let historical = table(
            &["V", "municipio", "ano"],
            &[
                &["10", "Paranagua", "2019"],
                &["20", "Paranagua", "2020"],
                &["...", "Paranagua", "2021"],
                &["7", "Pontal", "2020"],
            ],
        );

        let index = HistoricalIndex::build(&historical).expect("index");
        assert_eq!(index.key_column, "municipio");
        assert_eq!(index.skipped_values, 1);
        assert_eq!(index.lookup("qualquer", "PARANAGUA"), Some(15.0));
        assert_eq!(index.lookup("qualquer", "Pontal"), Some(7.0));
        assert_eq!(index.lookup("qualquer", "Matinhos"), None);
    }

    #[test]
    fn prefers_neighborhood_key_when_present() {
        let historical = table(
            &["bairro", "municipio", "V"],
            &[&["Centro", "Paranagua", "3"], &["Rocio", "Paranagua", "5"]],
        );

        let index = HistoricalIndex::build(&historical).expect("index");
        assert_eq!(index.key_column, "bairro");
        assert_eq!(index.lookup(" centro ", "Paranagua"), Some(3.0));
    }

    #[test]
    fn missing_value_column_disables_join() {
        let historical = table(&["municipio", "valor"], &[&["Paranagua", "3"]]);
        assert!(HistoricalIndex::build(&historical).is_none());
    }
}
