use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag columns added to every raw batch so a row can be traced back to the
/// partition that produced it.
pub const TAG_SOURCE: &str = "fonte";
pub const TAG_MUNICIPALITY: &str = "municipio";
pub const TAG_YEAR: &str = "ano";

/// Municipality covered by the pipeline, with its IBGE code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Municipality {
    pub name: String,
    pub code: u32,
}

impl Municipality {
    pub fn new(name: impl Into<String>, code: u32) -> Self {
        Self {
            name: name.into(),
            code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PartitionKey {
    pub municipality: String,
    pub municipality_code: Option<u32>,
    pub year: Option<i32>,
}

/// Smallest independently fetchable unit of a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PartitionSpec {
    pub source: String,
    pub key: PartitionKey,
}

impl PartitionSpec {
    pub fn municipality(source: &str, municipality: &Municipality) -> Self {
        Self {
            source: source.to_string(),
            key: PartitionKey {
                municipality: municipality.name.clone(),
                municipality_code: Some(municipality.code),
                year: None,
            },
        }
    }

    pub fn municipality_year(source: &str, municipality: &Municipality, year: i32) -> Self {
        let mut spec = Self::municipality(source, municipality);
        spec.key.year = Some(year);
        spec
    }
}

impl fmt::Display for PartitionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.key.municipality)?;
        if let Some(year) = self.key.year {
            write!(f, "/{year}")?;
        }
        Ok(())
    }
}

/// Why a single partition could not be fetched. Always partition-local.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Transport failure or timeout.
    #[error("source unavailable: {0}")]
    Unavailable(String),
    /// Nothing is published for this partition.
    #[error("partition not published: {0}")]
    Absent(String),
    /// Payload arrived but could not be parsed.
    #[error("malformed partition: {0}")]
    Malformed(String),
}

impl SourceError {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Unavailable(_) => "source_unavailable",
            SourceError::Absent(_) => "absent",
            SourceError::Malformed(_) => "malformed_partition",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Unavailable(_))
    }
}

/// Raw records fetched for one partition, before tagging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBatch {
    records: Table,
}

impl RawBatch {
    pub fn new(records: Table) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &Table {
        &self.records
    }

    pub(crate) fn into_tagged(self, partition: &PartitionSpec) -> Table {
        let mut table = self.records;
        table.set_constant_column(TAG_SOURCE, &partition.source);
        table.set_constant_column(TAG_MUNICIPALITY, &partition.key.municipality);
        let year = partition
            .key
            .year
            .map(|year| year.to_string())
            .unwrap_or_default();
        table.set_constant_column(TAG_YEAR, &year);
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_year_when_present() {
        let paranagua = Municipality::new("Paranagua", 4117700);
        assert_eq!(
            PartitionSpec::municipality("imoveis", &paranagua).to_string(),
            "imoveis/Paranagua"
        );
        assert_eq!(
            PartitionSpec::municipality_year("dados_historicos", &paranagua, 2019).to_string(),
            "dados_historicos/Paranagua/2019"
        );
    }

    #[test]
    fn tagging_adds_partition_columns() {
        let mut records = Table::new(["V"]);
        records.push_row(vec!["12".to_string()]).unwrap();
        let partition =
            PartitionSpec::municipality_year("dados_historicos", &Municipality::new("Pontal", 1), 2020);

        let tagged = RawBatch::new(records).into_tagged(&partition);
        assert_eq!(tagged.headers(), &["V", "fonte", "municipio", "ano"]);
        assert_eq!(tagged.value(0, "ano"), Some("2020"));
        assert_eq!(tagged.value(0, "fonte"), Some("dados_historicos"));
    }

    #[test]
    fn only_unavailable_is_transient() {
        assert!(SourceError::Unavailable("timeout".into()).is_transient());
        assert!(!SourceError::Absent("404".into()).is_transient());
        assert!(!SourceError::Malformed("bad json".into()).is_transient());
    }
}
