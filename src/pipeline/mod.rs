pub mod history;

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::db::executor::QueryResult;
use crate::db::schema_manager::SchemaSnapshot;
use crate::db::Database;
use crate::error::AssistantError;
use crate::llm::models::{CandidateQuery, CorrectionContext};
use crate::llm::{LlmError, LlmManager};
use crate::pipeline::history::{HistoryEntry, SessionHistory};
use crate::sql::{validate, Validation, ValidationIssue};

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Translating,
    Validating,
    Correcting,
    Executing,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub max_corrections: usize,
    pub correct_prepare_errors: bool,
    pub explain: bool,
    pub max_rows: usize,
}

impl AssistantSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_corrections: config.assistant.max_corrections,
            correct_prepare_errors: config.assistant.correct_prepare_errors,
            explain: config.assistant.explain,
            max_rows: config.database.max_rows,
        }
    }
}

/// Everything the UI shows for one successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub question: String,
    pub candidate: CandidateQuery,
    pub corrections: usize,
    pub stages: Vec<Stage>,
    pub result: QueryResult,
    pub explanation: Option<String>,
    pub elapsed_ms: u64,
}

struct Trace {
    stages: Vec<Stage>,
}

impl Trace {
    fn new() -> Self {
        Self {
            stages: vec![Stage::Received],
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!("Stage: {:?}", stage);
        self.stages.push(stage);
    }

    fn fail(&mut self, err: AssistantError) -> AssistantError {
        self.enter(Stage::Failed);
        warn!("Run failed after {:?}: {}", self.stages, err);
        err
    }
}

/// Question in, checked SQL and its result out.
pub struct Assistant {
    db: Database,
    llm: Arc<LlmManager>,
    schema: Arc<SchemaSnapshot>,
    schema_context: String,
    settings: AssistantSettings,
}

impl Assistant {
    pub fn new(
        db: Database,
        llm: Arc<LlmManager>,
        schema: SchemaSnapshot,
        schema_context: String,
        settings: AssistantSettings,
    ) -> Self {
        Self {
            db,
            llm,
            schema: Arc::new(schema),
            schema_context,
            settings,
        }
    }

    pub fn schema(&self) -> &SchemaSnapshot {
        &self.schema
    }

    pub fn llm(&self) -> &LlmManager {
        &self.llm
    }

    /// Translates, checks and runs `question`. Only a successful run is added to `history`.
    pub async fn ask(
        &self,
        question: &str,
        history: &mut SessionHistory,
    ) -> Result<RunReport, AssistantError> {
        let started = Instant::now();
        let question = question.trim();
        if question.is_empty() {
            return Err(AssistantError::EmptyQuestion);
        }
        info!("Question received: {}", question);

        let mut trace = Trace::new();
        let (candidate, corrections) = match self.resolve(question, &mut trace).await {
            Ok(resolved) => resolved,
            Err(e) => return Err(trace.fail(e)),
        };

        self.finish(question, candidate, corrections, trace, started, history)
            .await
    }

    /// Runs SQL the user edited by hand. It is checked once and never sent for correction.
    pub async fn run_sql(
        &self,
        sql: &str,
        question: Option<&str>,
        history: &mut SessionHistory,
    ) -> Result<RunReport, AssistantError> {
        let started = Instant::now();
        let question = question
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .unwrap_or("Edited query");
        let sql = sql.trim();

        let mut trace = Trace::new();
        trace.enter(Stage::Validating);
        let mut candidate = CandidateQuery::new(question, sql, 0);
        if let Validation::Invalid(issues) = self.check(sql).await? {
            candidate.mark_failed();
            return Err(trace.fail(AssistantError::RejectedSql {
                sql: sql.to_string(),
                issues,
            }));
        }
        candidate.mark_valid();

        self.finish(question, candidate, 0, trace, started, history)
            .await
    }

    /// The correction loop: one translation plus at most `max_corrections` retries.
    async fn resolve(
        &self,
        question: &str,
        trace: &mut Trace,
    ) -> Result<(CandidateQuery, usize), AssistantError> {
        let mut prior: Option<CorrectionContext> = None;
        let mut attempt = 0;

        loop {
            trace.enter(Stage::Translating);
            let translated = self
                .llm
                .translate(question, &self.schema_context, prior.as_ref(), attempt)
                .await;

            let (candidate, issues) = match translated {
                Ok(mut candidate) => {
                    trace.enter(Stage::Validating);
                    match self.check(&candidate.sql).await? {
                        Validation::Valid => {
                            candidate.mark_valid();
                            info!("SQL accepted after {} correction(s)", attempt);
                            return Ok((candidate, attempt));
                        }
                        Validation::Invalid(issues) => (Some(candidate), issues),
                    }
                }
                Err(LlmError::MalformedCompletion(preview)) => {
                    (None, vec![ValidationIssue::Malformed(preview)])
                }
                Err(e @ (LlmError::TemplateError(_) | LlmError::ConfigError(_))) => {
                    return Err(AssistantError::Internal(e.to_string()));
                }
                Err(e) => return Err(AssistantError::TranslationUnavailable(e.to_string())),
            };

            if attempt >= self.settings.max_corrections {
                return Err(match candidate {
                    Some(mut candidate) => {
                        candidate.mark_failed();
                        AssistantError::UnresolvableQuery {
                            corrections: attempt,
                            candidate: Some(candidate),
                            issues,
                        }
                    }
                    None => AssistantError::MalformedCompletion(
                        issues
                            .iter()
                            .find_map(|issue| match issue {
                                ValidationIssue::Malformed(preview) => Some(preview.clone()),
                                _ => None,
                            })
                            .unwrap_or_default(),
                    ),
                });
            }

            warn!(
                "Attempt {} rejected: {}",
                attempt,
                issues
                    .iter()
                    .map(|i| i.to_string())
                    .collect::<Vec<_>>()
                    .join("; ")
            );
            trace.enter(Stage::Correcting);
            prior = Some(CorrectionContext {
                previous_sql: candidate.map(|c| c.sql),
                issues,
            });
            attempt += 1;
        }
    }

    /// Identifier checks first, then an optional prepare against SQLite.
    async fn check(&self, sql: &str) -> Result<Validation, AssistantError> {
        let validation = validate(sql, &self.schema);
        if !validation.is_valid() || !self.settings.correct_prepare_errors {
            return Ok(validation);
        }

        Ok(match self.db.prepare(sql).await? {
            Ok(()) => Validation::Valid,
            Err(message) => Validation::Invalid(vec![ValidationIssue::Rejected(message)]),
        })
    }

    async fn finish(
        &self,
        question: &str,
        candidate: CandidateQuery,
        corrections: usize,
        mut trace: Trace,
        started: Instant,
        history: &mut SessionHistory,
    ) -> Result<RunReport, AssistantError> {
        trace.enter(Stage::Executing);
        let result = self.db.execute(&candidate.sql, self.settings.max_rows).await?;
        if let Some(message) = &result.error {
            return Err(trace.fail(AssistantError::Execution {
                sql: candidate.sql.clone(),
                message: message.clone(),
            }));
        }
        info!(
            "Query returned {} row(s) in {} ms",
            result.row_count(),
            result.execution_time_ms
        );

        let explanation = if self.settings.explain {
            match self.llm.explain(&candidate.sql).await {
                Ok(text) if !text.is_empty() => Some(text),
                Ok(_) => None,
                Err(e) => {
                    warn!("Could not explain query: {}", e);
                    None
                }
            }
        } else {
            None
        };

        history.append(HistoryEntry::new(question, &candidate.sql, &result));
        trace.enter(Stage::Succeeded);

        Ok(RunReport {
            question: question.to_string(),
            candidate,
            corrections,
            stages: trace.stages,
            result,
            explanation,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::test_support::coins_db;
    use crate::llm::test_support::ScriptedProvider;
    use tempfile::TempDir;

    pub fn settings() -> AssistantSettings {
        AssistantSettings {
            max_corrections: 2,
            correct_prepare_errors: true,
            explain: false,
            max_rows: 1000,
        }
    }

    /// An assistant over the SQLite file at `path` driven by `provider`.
    pub async fn assistant_at(
        path: &std::path::Path,
        provider: Arc<ScriptedProvider>,
        settings: AssistantSettings,
    ) -> Assistant {
        let db = Database::connect(path, 2).unwrap();
        let schema = db.schema().await.unwrap();
        let context = db.table_context(&schema, 3).await.unwrap();
        let llm = Arc::new(LlmManager::with_provider(provider).unwrap());
        Assistant::new(db, llm, schema, context, settings)
    }

    /// An assistant over the small coins fixture.
    pub async fn assistant(
        provider: Arc<ScriptedProvider>,
        settings: AssistantSettings,
    ) -> (TempDir, Assistant) {
        let (dir, path) = coins_db();
        let assistant = assistant_at(&path, provider, settings).await;
        (dir, assistant)
    }
}
