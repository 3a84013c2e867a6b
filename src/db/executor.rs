use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Instant;
use tracing::{debug, warn};

/// Rows returned by one statement, or the reason the store rejected it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub error: Option<String>,
    pub truncated: bool,
    #[serde(skip)]
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            error: Some(message.into()),
            truncated: false,
            execution_time_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Rows keyed by column name, in column order.
    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    /// Compares the data only, ignoring timing.
    pub fn same_data(&self, other: &QueryResult) -> bool {
        self.columns == other.columns
            && self.rows == other.rows
            && self.error == other.error
            && self.truncated == other.truncated
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}

/// Runs `sql` and collects up to `max_rows` rows. Store errors become a failed result.
pub fn execute(conn: &Connection, sql: &str, max_rows: usize) -> QueryResult {
    let start = Instant::now();

    match collect_rows(conn, sql, max_rows) {
        Ok((columns, rows, truncated)) => {
            let execution_time_ms = start.elapsed().as_millis() as u64;
            debug!(
                "Query returned {} rows in {}ms (truncated: {})",
                rows.len(),
                execution_time_ms,
                truncated
            );
            QueryResult {
                columns,
                rows,
                error: None,
                truncated,
                execution_time_ms,
            }
        }
        Err(e) => {
            warn!("Query failed: {}", e);
            QueryResult::failed(e.to_string())
        }
    }
}

fn collect_rows(
    conn: &Connection,
    sql: &str,
    max_rows: usize,
) -> rusqlite::Result<(Vec<String>, Vec<Vec<Value>>, bool)> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt
        .column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut rows = Vec::new();
    let mut truncated = false;
    let mut cursor = stmt.query([])?;
    while let Some(row) = cursor.next()? {
        if rows.len() == max_rows {
            truncated = true;
            break;
        }
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(to_json(row.get_ref(i)?));
        }
        rows.push(values);
    }

    Ok((columns, rows, truncated))
}

/// Compiles `sql` without running it.
pub fn prepare(conn: &Connection, sql: &str) -> Result<(), String> {
    conn.prepare(sql).map(|_| ()).map_err(|e| e.to_string())
}
