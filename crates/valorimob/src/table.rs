use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Read;

/// Tabular snapshot exchanged between stages through the staging store.
///
/// Cells are kept as text so raw upstream batches with heterogeneous schemas
/// can be concatenated before any typing happens. Typed stages convert through
/// [`Table::from_records`] and [`Table::to_records`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("invalid CSV data: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to encode table: {0}")]
    Io(#[from] std::io::Error),
    #[error("row has {found} cells but the table has {expected} columns")]
    RowWidth { expected: usize, found: usize },
}

impl Table {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// First required column that the table lacks, if any.
    pub fn missing_column<'a>(&self, required: &[&'a str]) -> Option<&'a str> {
        required
            .iter()
            .copied()
            .find(|column| !self.has_column(column))
    }

    pub fn push_row(&mut self, row: Vec<String>) -> Result<(), TableError> {
        if row.len() != self.headers.len() {
            return Err(TableError::RowWidth {
                expected: self.headers.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Cell text for `column` in row `row`; `None` when either is out of range.
    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.column_index(column)?;
        self.rows
            .get(row)
            .and_then(|cells| cells.get(index))
            .map(String::as_str)
    }

    /// Sets `column` to `value` on every row, adding the column when absent.
    pub fn set_constant_column(&mut self, column: &str, value: &str) {
        match self.column_index(column) {
            Some(index) => {
                for row in &mut self.rows {
                    row[index] = value.to_string();
                }
            }
            None => {
                self.headers.push(column.to_string());
                for row in &mut self.rows {
                    row.push(value.to_string());
                }
            }
        }
    }

    /// Appends `other` below this table. Columns are unioned in first-seen
    /// order and cells missing on either side stay empty.
    pub fn append(&mut self, other: Table) {
        if self.headers.is_empty() && self.rows.is_empty() {
            *self = other;
            return;
        }

        let mut mapping = Vec::with_capacity(other.headers.len());
        for header in &other.headers {
            let index = match self.column_index(header) {
                Some(index) => index,
                None => {
                    self.headers.push(header.clone());
                    for row in &mut self.rows {
                        row.push(String::new());
                    }
                    self.headers.len() - 1
                }
            };
            mapping.push(index);
        }

        let width = self.headers.len();
        for row in other.rows {
            let mut aligned = vec![String::new(); width];
            for (cell, &index) in row.into_iter().zip(&mapping) {
                aligned[index] = cell;
            }
            self.rows.push(aligned);
        }
    }

    /// Reads CSV exactly as written; cells keep surrounding whitespace.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, TableError> {
        Self::read_csv(reader, csv::Trim::None)
    }

    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self, TableError> {
        Self::from_csv_reader(bytes)
    }

    /// Reads a hand-maintained upstream export: headers and cells are trimmed.
    pub fn from_export_bytes(bytes: &[u8]) -> Result<Self, TableError> {
        Self::read_csv(bytes, csv::Trim::All)
    }

    fn read_csv<R: Read>(reader: R, trim: csv::Trim) -> Result<Self, TableError> {
        let mut csv_reader = csv::ReaderBuilder::new().trim(trim).from_reader(reader);

        let headers = csv_reader
            .headers()?
            .iter()
            .map(|header| header.trim_start_matches('\u{feff}').to_string())
            .collect::<Vec<_>>();
        let mut table = Table {
            headers,
            rows: Vec::new(),
        };

        for record in csv_reader.records() {
            let record = record?;
            table.push_row(record.iter().map(str::to_string).collect())?;
        }

        Ok(table)
    }

    /// Canonical CSV encoding; identical tables always encode to identical bytes.
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, TableError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer
            .into_inner()
            .map_err(|err| TableError::Io(err.into_error()))
    }

    /// Builds a table from typed records. `headers` must match the field order
    /// the records serialize with; it is also what an empty table carries.
    pub fn from_records<T: Serialize>(headers: &[&str], records: &[T]) -> Result<Self, TableError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer.write_record(headers)?;
        for record in records {
            writer.serialize(record)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| TableError::Io(err.into_error()))?;
        Self::from_csv_bytes(&bytes)
    }

    pub fn to_records<T: DeserializeOwned>(&self) -> Result<Vec<T>, TableError> {
        let bytes = self.to_csv_bytes()?;
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        reader
            .deserialize::<T>()
            .map(|record| record.map_err(TableError::from))
            .collect()
    }
}

/// Parses a numeric cell. Empty, non-numeric and non-finite cells are `None`.
pub(crate) fn parse_number(cell: &str) -> Option<f64> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|value| value.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn append_unions_columns_and_fills_gaps() {
        let mut left = Table::new(["preco", "bairro"]);
        left.push_row(vec!["100".into(), "Centro".into()]).unwrap();
        let mut right = Table::new(["bairro", "area_m2"]);
        right.push_row(vec!["Rocio".into(), "50".into()]).unwrap();

        left.append(right);

        assert_eq!(left.headers(), &["preco", "bairro", "area_m2"]);
        assert_eq!(left.rows()[0], vec!["100", "Centro", ""]);
        assert_eq!(left.rows()[1], vec!["", "Rocio", "50"]);
    }

    #[test]
    fn csv_encoding_is_stable_across_reparse() {
        let mut table = Table::new(["bairro", "obs"]);
        table
            .push_row(vec!["Vila, Nova".into(), "aspas \"duplas\"".into()])
            .unwrap();

        let bytes = table.to_csv_bytes().expect("encode");
        let reparsed = Table::from_csv_bytes(&bytes).expect("decode");
        assert_eq!(reparsed, table);
        assert_eq!(reparsed.to_csv_bytes().expect("encode again"), bytes);
    }

    #[test]
    fn csv_read_keeps_surrounding_whitespace() {
        let mut table = Table::new(["bairro", "obs"]);
        table
            .push_row(vec!["  Vila Nova ".into(), " x ".into()])
            .unwrap();

        let bytes = table.to_csv_bytes().expect("encode");
        assert_eq!(Table::from_csv_bytes(&bytes).expect("decode"), table);
    }

    #[test]
    fn export_read_trims_headers_and_cells() {
        let export = "\u{feff}preco , bairro\n 100 ,  Centro \n";
        let table = Table::from_export_bytes(export.as_bytes()).expect("decode");

        assert_eq!(table.headers(), &["preco", "bairro"]);
        assert_eq!(table.rows()[0], vec!["100", "Centro"]);
    }

    #[test]
    fn push_row_rejects_wrong_width() {
        let mut table = Table::new(["a", "b"]);
        let err = table.push_row(vec!["1".into()]).expect_err("width mismatch");
        assert!(matches!(err, TableError::RowWidth { expected: 2, found: 1 }));
    }

    #[test]
    fn set_constant_column_overwrites_existing_values() {
        let mut table = Table::new(["municipio"]);
        table.push_row(vec!["outro".into()]).unwrap();
        table.set_constant_column("municipio", "Paranagua");
        table.set_constant_column("ano", "2020");

        assert_eq!(table.value(0, "municipio"), Some("Paranagua"));
        assert_eq!(table.value(0, "ano"), Some("2020"));
    }

    #[test]
    fn typed_records_survive_conversion() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Row {
            bairro: String,
            valor: Option<f64>,
        }

        let rows = vec![
            Row {
                bairro: "centro".into(),
                valor: Some(2.5),
            },
            Row {
                bairro: "rocio".into(),
                valor: None,
            },
        ];
        let table = Table::from_records(&["bairro", "valor"], &rows).expect("table");
        assert_eq!(table.value(1, "valor"), Some(""));

        let back: Vec<Row> = table.to_records().expect("records");
        assert_eq!(back, rows);
    }

    #[test]
    fn empty_record_set_keeps_headers() {
        let rows: Vec<(String, f64)> = Vec::new();
        let table = Table::from_records(&["bairro", "valor"], &rows).expect("table");
        assert!(table.is_empty());
        assert_eq!(table.headers(), &["bairro", "valor"]);
    }

    #[test]
    fn parse_number_rejects_blanks_and_garbage() {
        assert_eq!(parse_number(" 42.5 "), Some(42.5));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("..."), None);
        assert_eq!(parse_number("NaN"), None);
    }
}
