use serde::{Deserialize, Serialize};

/// SQLite column affinity inferred for a CSV column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Real,
    Text,
}

impl DataType {
    pub fn to_sql_type(&self) -> &'static str {
        match self {
            DataType::Integer => "INTEGER",
            DataType::Real => "REAL",
            DataType::Text => "TEXT",
        }
    }

    /// Narrowest type that holds both.
    pub fn widen(self, other: DataType) -> DataType {
        match (self, other) {
            (DataType::Text, _) | (_, DataType::Text) => DataType::Text,
            (DataType::Real, _) | (_, DataType::Real) => DataType::Real,
            _ => DataType::Integer,
        }
    }

    pub fn of_value(value: &str) -> DataType {
        if value.parse::<i64>().is_ok() {
            DataType::Integer
        } else if value.parse::<f64>().is_ok() {
            DataType::Real
        } else {
            DataType::Text
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: DataType,
}

impl ColumnSchema {
    pub fn to_sql_definition(&self) -> String {
        format!("\"{}\" {}", self.name, self.data_type.to_sql_type())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn to_create_table_sql(&self) -> String {
        let columns_sql: Vec<String> = self
            .columns
            .iter()
            .map(|col| col.to_sql_definition())
            .collect();

        format!(
            "CREATE TABLE \"{}\" (\n    {}\n);",
            self.name,
            columns_sql.join(",\n    ")
        )
    }

    pub fn to_insert_sql(&self) -> String {
        let names: Vec<String> = self.columns.iter().map(|c| format!("\"{}\"", c.name)).collect();
        let placeholders = vec!["?"; self.columns.len()].join(", ");
        format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            self.name,
            names.join(", "),
            placeholders
        )
    }
}

/// Lowercase snake_case identifier for a CSV header.
pub fn normalize_column_name(header: &str) -> String {
    let mut name = String::with_capacity(header.len());
    let mut last_underscore = true;
    for c in header.trim().chars() {
        if c.is_alphanumeric() {
            name.extend(c.to_lowercase());
            last_underscore = false;
        } else if c == '%' {
            if !last_underscore {
                name.push('_');
            }
            name.push_str("pct");
            last_underscore = false;
        } else if !last_underscore {
            name.push('_');
            last_underscore = true;
        }
    }
    let name = name.trim_end_matches('_').to_string();
    if name.is_empty() {
        "column".to_string()
    } else {
        name
    }
}
