pub mod db_pool;
pub mod executor;
pub mod schema_manager;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

use crate::db::executor::QueryResult;
use crate::db::schema_manager::SchemaSnapshot;
use crate::error::AssistantError;

/// Pooled read-only access to the SQLite data file.
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    pub fn connect(path: impl AsRef<Path>, pool_size: u32) -> Result<Self, AssistantError> {
        let path = path.as_ref().to_path_buf();

        if !path.is_file() {
            error!("Database file not found: {}", path.display());
            return Err(AssistantError::Connection(format!(
                "database file not found: {}",
                path.display()
            )));
        }

        // Fail fast instead of waiting out the pool timeout
        let manager = db_pool::read_only(&path);
        r2d2::ManageConnection::connect(&manager).map_err(|e| {
            error!("Failed to open database at {}: {}", path.display(), e);
            AssistantError::Connection(format!("{}: {}", path.display(), e))
        })?;

        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_timeout(Duration::from_secs(5))
            .build(manager)
            .map_err(|e| AssistantError::Connection(e.to_string()))?;

        info!("Opened read-only database at {}", path.display());
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, AssistantError> {
        self.pool
            .get()
            .map_err(|e| AssistantError::Connection(e.to_string()))
    }

    /// Runs blocking work on a pooled connection off the async runtime.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, AssistantError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> T + Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || -> Result<T, AssistantError> {
            let conn = db.conn()?;
            Ok(f(&*conn))
        })
        .await
        .map_err(|e| AssistantError::Internal(format!("database task failed: {}", e)))?
    }

    /// Snapshot of the user tables. A file without tables has nothing to ground
    /// translations on and is reported as a connection error.
    pub async fn schema(&self) -> Result<SchemaSnapshot, AssistantError> {
        let snapshot = self
            .with_conn(|conn| schema_manager::load_snapshot(conn))
            .await?
            .map_err(|e| AssistantError::Connection(format!("schema introspection failed: {}", e)))?;
        if snapshot.is_empty() {
            return Err(AssistantError::Connection(
                "database contains no tables".to_string(),
            ));
        }
        Ok(snapshot)
    }

    /// Prompt context for the snapshot (DDL and sample rows).
    pub async fn table_context(
        &self,
        snapshot: &SchemaSnapshot,
        sample_rows: usize,
    ) -> Result<String, AssistantError> {
        let snapshot = snapshot.clone();
        self.with_conn(move |conn| schema_manager::render_context(conn, &snapshot, sample_rows))
            .await?
            .map_err(|e| AssistantError::Connection(format!("schema introspection failed: {}", e)))
    }

    pub async fn prepare(&self, sql: &str) -> Result<Result<(), String>, AssistantError> {
        let sql = sql.to_string();
        self.with_conn(move |conn| executor::prepare(conn, &sql)).await
    }

    pub async fn execute(&self, sql: &str, max_rows: usize) -> Result<QueryResult, AssistantError> {
        let sql = sql.to_string();
        self.with_conn(move |conn| executor::execute(conn, &sql, max_rows))
            .await
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::coins_db;
    use super::*;

    #[tokio::test]
    async fn test_connect_missing_file_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Database::connect(dir.path().join("absent.sqlite"), 2);
        assert!(matches!(result, Err(AssistantError::Connection(_))));
    }

    #[tokio::test]
    async fn test_schema_without_tables_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.sqlite");
        Connection::open(&path)
            .unwrap()
            .execute_batch("PRAGMA user_version = 1;")
            .unwrap();

        let db = Database::connect(&path, 1).unwrap();
        let err = db.schema().await.unwrap_err();
        assert!(matches!(err, AssistantError::Connection(_)));
        assert!(err.to_string().contains("no tables"));
    }

    #[tokio::test]
    async fn test_schema_and_execute() {
        let (_dir, path) = coins_db();
        let db = Database::connect(&path, 2).unwrap();

        let snapshot = db.schema().await.unwrap();
        assert!(snapshot.has_table("coins"));
        assert!(snapshot.has_column("coins", "market_cap"));

        let result = db
            .execute("SELECT coin FROM coins WHERE date = '2019-01-01'", 100)
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.row_count(), 1);
    }

    #[tokio::test]
    async fn test_connection_is_read_only() {
        let (_dir, path) = coins_db();
        let db = Database::connect(&path, 1).unwrap();

        let result = db.execute("DELETE FROM coins", 100).await.unwrap();
        assert!(!result.is_success());

        let count = db.execute("SELECT COUNT(*) FROM coins", 100).await.unwrap();
        assert_eq!(count.rows[0][0], serde_json::Value::from(10));
    }

    #[tokio::test]
    async fn test_prepare_does_not_execute() {
        let (_dir, path) = coins_db();
        let db = Database::connect(&path, 1).unwrap();

        assert!(db.prepare("SELECT * FROM coins").await.unwrap().is_ok());
        assert!(db.prepare("SELECT * FROM prices").await.unwrap().is_err());
    }
}
