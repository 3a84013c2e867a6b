use serde::Serialize;
use sqlparser::ast::{Expr, Query, Statement, TableFactor, Visit, Visitor};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::ControlFlow;
use tracing::debug;

use crate::db::schema_manager::SchemaSnapshot;

/// Why a candidate statement cannot be run as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidationIssue {
    MissingTable(String),
    MissingColumn { table: String, column: String },
    NotReadOnly(String),
    MultipleStatements,
    Malformed(String),
    Rejected(String),
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingTable(t) => write!(f, "table `{}` does not exist", t),
            ValidationIssue::MissingColumn { table, column } => {
                write!(f, "column `{}` does not exist in table `{}`", column, table)
            }
            ValidationIssue::NotReadOnly(kw) => {
                write!(f, "only read-only SELECT queries are allowed (found `{}`)", kw)
            }
            ValidationIssue::MultipleStatements => write!(f, "only a single statement is allowed"),
            ValidationIssue::Malformed(msg) => write!(f, "no SQL statement found: {}", msg),
            ValidationIssue::Rejected(msg) => write!(f, "the statement was rejected: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Invalid(Vec<ValidationIssue>),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            Validation::Valid => &[],
            Validation::Invalid(issues) => issues,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TableRef {
    schema: Option<String>,
    name: String,
}

/// Identifiers a statement refers to, gathered from the parsed AST.
#[derive(Debug, Default)]
struct References {
    tables: Vec<TableRef>,
    /// `(qualifier, column)` pairs, e.g. `c.price`.
    columns: Vec<(String, String)>,
    ctes: HashSet<String>,
    /// Lowercased alias or table name to the table it stands for. `None` marks
    /// derived tables, CTEs and qualifiers bound to more than one table.
    aliases: Vec<(String, Option<TableRef>)>,
    /// Leading keyword of every nested statement that is not a query.
    writes: Vec<String>,
}

impl References {
    fn qualifiers(&self) -> HashMap<String, Option<String>> {
        let mut qualifiers = HashMap::new();
        for (key, table) in &self.aliases {
            let target = table.as_ref().and_then(|t| {
                let is_cte = t.schema.is_none() && self.ctes.contains(&t.name.to_lowercase());
                (!is_cte).then(|| t.name.clone())
            });
            match qualifiers.get(key) {
                Some(existing) if *existing != target => {
                    qualifiers.insert(key.clone(), None);
                }
                Some(_) => {}
                None => {
                    qualifiers.insert(key.clone(), target);
                }
            }
        }
        qualifiers
    }
}

impl Visitor for References {
    type Break = ();

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<()> {
        if !matches!(statement, Statement::Query(_)) {
            let text = statement.to_string();
            let keyword = text.split_whitespace().next().unwrap_or_default();
            self.writes.push(keyword.to_uppercase());
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<()> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(cte.alias.name.value.to_lowercase());
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<()> {
        match factor {
            // Table-valued function such as json_each(...)
            TableFactor::Table {
                alias, args: Some(_), ..
            } => {
                if let Some(alias) = alias {
                    self.aliases.push((alias.name.value.to_lowercase(), None));
                }
            }
            TableFactor::Table { name, alias, .. } => {
                let parts = &name.0;
                let Some(last) = parts.last() else {
                    return ControlFlow::Continue(());
                };
                let schema = (parts.len() > 1).then(|| parts[parts.len() - 2].value.clone());
                let table = TableRef {
                    schema,
                    name: last.value.clone(),
                };
                self.aliases
                    .push((table.name.to_lowercase(), Some(table.clone())));
                if let Some(alias) = alias {
                    self.aliases
                        .push((alias.name.value.to_lowercase(), Some(table.clone())));
                }
                if !self.tables.contains(&table) {
                    self.tables.push(table);
                }
            }
            TableFactor::Derived {
                alias: Some(alias), ..
            } => {
                self.aliases.push((alias.name.value.to_lowercase(), None));
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<()> {
        // `c.price` and `main.coins.price`
        if let Expr::CompoundIdentifier(parts) = expr {
            if let [.., qualifier, column] = parts.as_slice() {
                self.columns
                    .push((qualifier.value.clone(), column.value.clone()));
            }
        }
        ControlFlow::Continue(())
    }
}

fn push_unique(issues: &mut Vec<ValidationIssue>, issue: ValidationIssue) {
    if !issues.contains(&issue) {
        issues.push(issue);
    }
}

/// Checks `sql` against the snapshot: single read-only statement, known tables,
/// and known columns for qualified references.
pub fn validate(sql: &str, snapshot: &SchemaSnapshot) -> Validation {
    let statements = match Parser::parse_sql(&SQLiteDialect {}, sql) {
        Ok(statements) => statements,
        Err(e) => {
            debug!("SQL did not parse: {}", e);
            return Validation::Invalid(vec![ValidationIssue::Rejected(e.to_string())]);
        }
    };
    if statements.is_empty() {
        return Validation::Invalid(vec![ValidationIssue::Malformed(
            "empty statement".to_string(),
        )]);
    }

    let mut issues = Vec::new();
    if statements.len() > 1 {
        issues.push(ValidationIssue::MultipleStatements);
    }

    let mut refs = References::default();
    for statement in &statements {
        let _ = statement.visit(&mut refs);
    }
    debug!(
        "Extracted {} table and {} column references",
        refs.tables.len(),
        refs.columns.len()
    );

    for keyword in &refs.writes {
        push_unique(&mut issues, ValidationIssue::NotReadOnly(keyword.clone()));
    }

    for table in &refs.tables {
        let issue = match &table.schema {
            Some(schema)
                if !schema.eq_ignore_ascii_case("main") && !schema.eq_ignore_ascii_case("temp") =>
            {
                Some(ValidationIssue::MissingTable(format!("{}.{}", schema, table.name)))
            }
            schema => {
                let name = table.name.to_lowercase();
                let known = (schema.is_none() && refs.ctes.contains(&name))
                    || name.starts_with("sqlite_")
                    || snapshot.has_table(&name);
                (!known).then(|| ValidationIssue::MissingTable(table.name.clone()))
            }
        };
        if let Some(issue) = issue {
            push_unique(&mut issues, issue);
        }
    }

    let qualifiers = refs.qualifiers();
    for (qualifier, column) in &refs.columns {
        let Some(Some(table)) = qualifiers.get(&qualifier.to_lowercase()) else {
            continue;
        };
        let Some(info) = snapshot.table(table) else {
            continue;
        };
        if !info.has_column(column) {
            push_unique(
                &mut issues,
                ValidationIssue::MissingColumn {
                    table: info.name.clone(),
                    column: column.clone(),
                },
            );
        }
    }

    if issues.is_empty() {
        Validation::Valid
    } else {
        Validation::Invalid(issues)
    }
}
