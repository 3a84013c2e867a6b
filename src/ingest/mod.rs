pub mod csv;
pub mod schema;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Parsing error: {0}")]
    ParsingError(String),
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("Database already exists: {0}")]
    AlreadyExists(String),
}

pub trait FileIngestor: Send + Sync {
    fn ingest(&self, conn: &mut Connection, path: &Path, table_name: &str) -> Result<schema::TableSchema, IngestError>;
}

/// Builds the read-only dataset file from a source file.
pub struct IngestManager {
    csv_ingestor: csv::CsvIngestor,
}

impl IngestManager {
    pub fn new() -> Self {
        Self {
            csv_ingestor: csv::CsvIngestor::new(),
        }
    }

    /// Creates `db_path` and loads `source` into `table_name`. Refuses to touch an existing file.
    pub fn create_database(
        &self,
        db_path: &Path,
        source: &Path,
        table_name: &str,
    ) -> Result<schema::TableSchema, IngestError> {
        if db_path.exists() {
            return Err(IngestError::AlreadyExists(db_path.display().to_string()));
        }

        let extension = source
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| IngestError::UnsupportedFileType("No extension".to_string()))?;

        let ingestor: &dyn FileIngestor = match extension.to_lowercase().as_str() {
            "csv" => &self.csv_ingestor,
            _ => return Err(IngestError::UnsupportedFileType(extension.to_string())),
        };

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        info!("Creating {} from {}", db_path.display(), source.display());
        let mut conn = Connection::open(db_path)?;
        match ingestor.ingest(&mut conn, source, table_name) {
            Ok(schema) => {
                self.verify_ingestion(&conn, table_name)?;
                Ok(schema)
            }
            Err(e) => {
                error!("Ingestion failed: {}", e);
                drop(conn);
                // Leave no half-built file behind
                let _ = std::fs::remove_file(db_path);
                Err(e)
            }
        }
    }

    // Verify that a table was properly ingested
    pub fn verify_ingestion(&self, conn: &Connection, table_name: &str) -> Result<i64, IngestError> {
        let verify_sql = format!("SELECT COUNT(*) FROM \"{}\"", table_name);
        let count = conn.query_row(&verify_sql, [], |row| row.get::<_, i64>(0))?;
        info!("Verified table {} exists with {} rows", table_name, count);
        Ok(count)
    }
}

impl Default for IngestManager {
    fn default() -> Self {
        Self::new()
    }
}
