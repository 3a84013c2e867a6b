use thiserror::Error;

use crate::llm::models::CandidateQuery;
use crate::sql::ValidationIssue;

/// Failures a single question can end in.
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("database connection error: {0}")]
    Connection(String),

    #[error("question must not be empty")]
    EmptyQuestion,

    #[error("translation service unavailable: {0}")]
    TranslationUnavailable(String),

    #[error("completion did not contain a SQL statement: {0}")]
    MalformedCompletion(String),

    #[error("could not produce valid SQL after {corrections} correction(s): {}", join_issues(.issues))]
    UnresolvableQuery {
        corrections: usize,
        candidate: Option<CandidateQuery>,
        issues: Vec<ValidationIssue>,
    },

    #[error("SQL was rejected: {}", join_issues(.issues))]
    RejectedSql {
        sql: String,
        issues: Vec<ValidationIssue>,
    },

    #[error("SQL error: {message}")]
    Execution { sql: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AssistantError {
    /// Stable identifier used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AssistantError::Connection(_) => "connection_error",
            AssistantError::EmptyQuestion => "empty_question",
            AssistantError::TranslationUnavailable(_) => "translation_unavailable",
            AssistantError::MalformedCompletion(_) => "malformed_completion",
            AssistantError::UnresolvableQuery { .. } => "unresolvable_query",
            AssistantError::RejectedSql { .. } => "rejected_sql",
            AssistantError::Execution { .. } => "execution_error",
            AssistantError::Internal(_) => "internal_error",
        }
    }

    /// The SQL the failure relates to, if any.
    pub fn sql(&self) -> Option<&str> {
        match self {
            AssistantError::UnresolvableQuery { candidate, .. } => {
                candidate.as_ref().map(|c| c.sql.as_str())
            }
            AssistantError::RejectedSql { sql, .. } | AssistantError::Execution { sql, .. } => {
                Some(sql)
            }
            _ => None,
        }
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
