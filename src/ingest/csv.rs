use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use tracing::{debug, info};

use crate::ingest::schema::{normalize_column_name, ColumnSchema, DataType, TableSchema};
use crate::ingest::{FileIngestor, IngestError};

pub struct CsvIngestor {
    sample_size: usize,
}

impl CsvIngestor {
    pub fn new() -> Self {
        Self {
            sample_size: 1000, // Default sample size for schema inference
        }
    }

    pub fn with_sample_size(sample_size: usize) -> Self {
        Self { sample_size }
    }

    fn reader(path: &Path) -> Result<csv::Reader<std::fs::File>, IngestError> {
        csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| IngestError::ParsingError(e.to_string()))
    }

    /// Column names from the header and types from the first `sample_size` records.
    pub fn infer_schema(&self, path: &Path, table_name: &str) -> Result<TableSchema, IngestError> {
        let mut reader = Self::reader(path)?;
        let headers = reader
            .headers()
            .map_err(|e| IngestError::ParsingError(e.to_string()))?
            .clone();

        if headers.is_empty() {
            return Err(IngestError::ParsingError("CSV has no header row".to_string()));
        }

        let mut types: Vec<Option<DataType>> = vec![None; headers.len()];
        for record in reader.records().take(self.sample_size) {
            let record = record.map_err(|e| IngestError::ParsingError(e.to_string()))?;
            for (slot, value) in types.iter_mut().zip(record.iter()) {
                if value.is_empty() {
                    continue;
                }
                let seen = DataType::of_value(value);
                *slot = Some(slot.map_or(seen, |t| t.widen(seen)));
            }
        }

        let columns = headers
            .iter()
            .zip(types)
            .map(|(header, data_type)| ColumnSchema {
                name: normalize_column_name(header),
                data_type: data_type.unwrap_or(DataType::Text),
            })
            .collect();

        Ok(TableSchema {
            name: table_name.to_string(),
            columns,
        })
    }
}

impl Default for CsvIngestor {
    fn default() -> Self {
        Self::new()
    }
}

fn to_value(raw: &str, data_type: DataType) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    match data_type {
        DataType::Integer => raw.parse().map(Value::Integer).unwrap_or_else(|_| Value::Text(raw.to_string())),
        DataType::Real => raw.parse().map(Value::Real).unwrap_or_else(|_| Value::Text(raw.to_string())),
        DataType::Text => Value::Text(raw.to_string()),
    }
}

impl FileIngestor for CsvIngestor {
    fn ingest(&self, conn: &mut Connection, path: &Path, table_name: &str) -> Result<TableSchema, IngestError> {
        let schema = self.infer_schema(path, table_name)?;
        debug!("Inferred schema for {}: {:?}", path.display(), schema.columns);

        let tx = conn.transaction()?;
        tx.execute(&schema.to_create_table_sql(), [])?;

        let mut rows = 0usize;
        {
            let mut stmt = tx.prepare(&schema.to_insert_sql())?;
            let mut reader = Self::reader(path)?;
            for record in reader.records() {
                let record = record.map_err(|e| IngestError::ParsingError(e.to_string()))?;
                let values = schema
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(i, col)| to_value(record.get(i).unwrap_or_default(), col.data_type));
                stmt.execute(params_from_iter(values))?;
                rows += 1;
            }
        }
        tx.commit()?;

        info!("Loaded {} rows into table {}", rows, table_name);
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn csv_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_infer_schema() {
        let file = csv_file("Coin,Price,Volume,Date\nbitcoin,100.5,10,2021-01-01\nether,20,,2021-01-02\n");
        let schema = CsvIngestor::new().infer_schema(file.path(), "coins").unwrap();

        let summary: Vec<(&str, DataType)> = schema
            .columns
            .iter()
            .map(|c| (c.name.as_str(), c.data_type))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("coin", DataType::Text),
                ("price", DataType::Real),
                ("volume", DataType::Integer),
                ("date", DataType::Text),
            ]
        );
    }

    #[test]
    fn test_sample_size_limits_inference() {
        let file = csv_file("n\n1\n2\nthree\n");
        let schema = CsvIngestor::with_sample_size(2).infer_schema(file.path(), "t").unwrap();
        assert_eq!(schema.columns[0].data_type, DataType::Integer);
    }

    #[test]
    fn test_ingest_loads_rows_with_nulls() {
        let file = csv_file("coin,price,volume\nbitcoin,100.5,10\nether,20,\n");
        let mut conn = Connection::open_in_memory().unwrap();

        CsvIngestor::new().ingest(&mut conn, file.path(), "coins").unwrap();

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM coins", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 2);
        let volume: Option<i64> = conn
            .query_row("SELECT volume FROM coins WHERE coin = 'ether'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(volume, None);
        let price: f64 = conn
            .query_row("SELECT price FROM coins WHERE coin = 'ether'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(price, 20.0);
    }
}
