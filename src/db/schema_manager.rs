use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(column))
    }

    pub fn to_create_table_sql(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("\"{}\" {}", c.name, c.data_type))
            .collect();

        format!(
            "CREATE TABLE \"{}\" (\n    {}\n);",
            self.name,
            columns.join(",\n    ")
        )
    }
}

/// Tables and ordered columns of the database, keyed case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaSnapshot {
    tables: BTreeMap<String, TableInfo>,
}

impl SchemaSnapshot {
    pub fn new(tables: Vec<TableInfo>) -> Self {
        Self {
            tables: tables
                .into_iter()
                .map(|t| (t.name.to_lowercase(), t))
                .collect(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.get(&name.to_lowercase())
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(&name.to_lowercase())
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.table(table).is_some_and(|t| t.has_column(column))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Reads user tables and their columns from `sqlite_master`.
pub fn load_snapshot(conn: &Connection) -> rusqlite::Result<SchemaSnapshot> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<_, _>>()?;

    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        let mut col_stmt = conn.prepare(&format!("PRAGMA table_info(\"{}\")", name))?;
        let columns: Vec<ColumnInfo> = col_stmt
            .query_map([], |row| {
                Ok(ColumnInfo {
                    name: row.get::<_, String>(1)?,
                    data_type: row.get::<_, String>(2)?,
                })
            })?
            .collect::<Result<_, _>>()?;

        debug!("Table {} has {} columns", name, columns.len());
        tables.push(TableInfo { name, columns });
    }

    info!("Loaded schema snapshot with {} tables", tables.len());
    Ok(SchemaSnapshot::new(tables))
}

/// Renders the snapshot as prompt context: DDL per table plus a few sample rows.
pub fn render_context(
    conn: &Connection,
    snapshot: &SchemaSnapshot,
    sample_rows: usize,
) -> rusqlite::Result<String> {
    let mut blocks = Vec::new();

    for table in snapshot.tables() {
        let mut block = table.to_create_table_sql();

        if sample_rows > 0 {
            let mut stmt = conn.prepare(&format!(
                "SELECT * FROM \"{}\" LIMIT {}",
                table.name, sample_rows
            ))?;
            let column_count = stmt.column_count();
            let header = stmt
                .column_names()
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join("\t");

            let mut lines = Vec::new();
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    values.push(match row.get_ref(i)? {
                        ValueRef::Null => "NULL".to_string(),
                        ValueRef::Integer(n) => n.to_string(),
                        ValueRef::Real(f) => f.to_string(),
                        ValueRef::Text(t) => String::from_utf8_lossy(t).to_string(),
                        ValueRef::Blob(b) => format!("<blob {} bytes>", b.len()),
                    });
                }
                lines.push(values.join("\t"));
            }

            if !lines.is_empty() {
                block.push_str(&format!(
                    "\n\n/*\n{} rows from {} table:\n{}\n{}\n*/",
                    lines.len(),
                    table.name,
                    header,
                    lines.join("\n")
                ));
            }
        }

        blocks.push(block);
    }

    Ok(blocks.join("\n\n"))
}
