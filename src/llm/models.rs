use serde::Serialize;

use crate::sql::ValidationIssue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Unvalidated,
    Valid,
    Corrected,
    Failed,
}

// A statement produced by the translator for one question
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateQuery {
    pub question: String,
    pub sql: String,
    pub status: QueryStatus,
    /// 0 for the first translation, n for the n-th correction.
    pub attempt: usize,
}

impl CandidateQuery {
    pub fn new(question: impl Into<String>, sql: impl Into<String>, attempt: usize) -> Self {
        Self {
            question: question.into(),
            sql: sql.into(),
            status: QueryStatus::Unvalidated,
            attempt,
        }
    }

    pub fn mark_valid(&mut self) {
        self.status = if self.attempt == 0 {
            QueryStatus::Valid
        } else {
            QueryStatus::Corrected
        };
    }

    pub fn mark_failed(&mut self) {
        self.status = QueryStatus::Failed;
    }
}

// What went wrong with the previous attempt, folded into the retry prompt
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionContext {
    pub previous_sql: Option<String>,
    pub issues: Vec<ValidationIssue>,
}
