use super::{SourceAdapter, SourceSetupError};
use crate::ingestion::partition::{Municipality, PartitionSpec, RawBatch, SourceError};
use crate::table::Table;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// IBGE SIDRA table/variable pair queried for the historical series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidraConfig {
    pub base_url: String,
    pub table: u32,
    pub variable: u32,
}

impl Default for SidraConfig {
    fn default() -> Self {
        Self {
            base_url: "https://servicodados.ibge.gov.br/api/v1/sidra".to_string(),
            table: 6562,
            variable: 7694,
        }
    }
}

impl SidraConfig {
    pub fn values_url(&self, municipality_code: u32, year: i32) -> String {
        format!(
            "{}/values/{}/n1/all/n2/{}/v/all/p/{}/c11255/{}/d/v{}%202",
            self.base_url.trim_end_matches('/'),
            self.table,
            municipality_code,
            year,
            self.variable,
            self.variable
        )
    }
}

/// Historical demographic series, one partition per municipality and year.
#[derive(Debug, Clone)]
pub struct SidraSource {
    source_id: String,
    client: reqwest::Client,
    config: SidraConfig,
    municipalities: Vec<Municipality>,
    years: Vec<i32>,
}

impl SidraSource {
    pub const SOURCE_ID: &'static str = "dados_historicos";

    pub fn new(
        config: SidraConfig,
        municipalities: Vec<Municipality>,
        years: Vec<i32>,
        request_timeout: Duration,
    ) -> Result<Self, SourceSetupError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|source| SourceSetupError::HttpClient {
                source_id: Self::SOURCE_ID,
                source,
            })?;

        Ok(Self {
            source_id: Self::SOURCE_ID.to_string(),
            client,
            config,
            municipalities,
            years,
        })
    }
}

#[async_trait]
impl SourceAdapter for SidraSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn partitions(&self) -> Vec<PartitionSpec> {
        self.municipalities
            .iter()
            .flat_map(|municipality| {
                self.years.iter().map(move |&year| {
                    PartitionSpec::municipality_year(&self.source_id, municipality, year)
                })
            })
            .collect()
    }

    async fn fetch(&self, partition: &PartitionSpec) -> Result<RawBatch, SourceError> {
        let (Some(code), Some(year)) = (partition.key.municipality_code, partition.key.year) else {
            return Err(SourceError::Malformed(format!(
                "{partition} lacks a municipality code or year"
            )));
        };

        let url = self.config.values_url(code, year);
        debug!(partition = %partition, %url, "requesting SIDRA values");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| SourceError::Unavailable(err.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(SourceError::Absent(url)),
            status if !status.is_success() => {
                return Err(SourceError::Unavailable(format!("{url} returned {status}")))
            }
            _ => {}
        }

        let body = response
            .text()
            .await
            .map_err(|err| SourceError::Unavailable(err.to_string()))?;
        parse_values_payload(&body).map(RawBatch::new)
    }
}

/// SIDRA answers with a JSON array of objects; the first object is the header
/// row (its keys are the column codes) and every following object is a record.
pub(crate) fn parse_values_payload(body: &str) -> Result<Table, SourceError> {
    let payload: Value = serde_json::from_str(body)
        .map_err(|err| SourceError::Malformed(format!("invalid JSON: {err}")))?;
    let Value::Array(entries) = payload else {
        return Err(SourceError::Malformed("expected a JSON array".to_string()));
    };
    let mut entries = entries.into_iter();
    let Some(Value::Object(header)) = entries.next() else {
        return Err(SourceError::Malformed(
            "payload has no header object".to_string(),
        ));
    };

    let columns: Vec<String> = header.keys().cloned().collect();
    let mut table = Table::new(columns.iter().cloned());

    for (position, entry) in entries.enumerate() {
        let Value::Object(record) = entry else {
            return Err(SourceError::Malformed(format!(
                "record {} is not an object",
                position + 1
            )));
        };
        let row = columns
            .iter()
            .map(|column| record.get(column).map(cell_text).unwrap_or_default())
            .collect();
        table
            .push_row(row)
            .map_err(|err| SourceError::Malformed(err.to_string()))?;
    }

    Ok(table)
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.trim().to_string(),
        other => other.to_string(),
    }
}
