pub mod extract;
pub mod models;
pub mod prompts;
pub mod providers;

use crate::config::LlmConfig;
use crate::llm::models::{CandidateQuery, CorrectionContext};
use crate::llm::prompts::PromptLibrary;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM connection error: {0}")]
    ConnectionError(String),
    #[error("LLM response error: {0}")]
    ResponseError(String),
    #[error("LLM configuration error: {0}")]
    ConfigError(String),
    #[error("LLM prompt template error: {0}")]
    TemplateError(String),
    #[error("LLM completion contained no SQL statement: {0}")]
    MalformedCompletion(String),
}

/// A text-in, text-out completion endpoint.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    fn name(&self) -> &str;
}

/// Turns questions into candidate SQL and SQL into explanations.
pub struct LlmManager {
    provider: Arc<dyn CompletionProvider>,
    prompts: PromptLibrary,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let provider: Arc<dyn CompletionProvider> = match config.backend.as_str() {
            "remote" => Arc::new(providers::remote::RemoteLlmProvider::new(config)?),
            "ollama" => Arc::new(providers::ollama::OllamaProvider::new(config)?),
            _ => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )))
            }
        };

        Self::with_provider(provider)
    }

    pub fn with_provider(provider: Arc<dyn CompletionProvider>) -> Result<Self, LlmError> {
        Ok(Self {
            provider,
            prompts: PromptLibrary::new()?,
        })
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Asks for SQL answering `question`. With `prior`, the previous attempt and
    /// its problems are part of the prompt.
    pub async fn translate(
        &self,
        question: &str,
        schema: &str,
        prior: Option<&CorrectionContext>,
        attempt: usize,
    ) -> Result<CandidateQuery, LlmError> {
        let prompt = match prior {
            Some(correction) => self.prompts.correct(question, schema, correction)?,
            None => self.prompts.generate(question, schema)?,
        };

        info!(
            "Requesting SQL from {} (attempt {})",
            self.provider.name(),
            attempt
        );
        let completion = self.provider.complete(&prompt).await?;

        match extract::extract_sql(&completion) {
            Some(sql) => {
                info!("Candidate SQL: {}", sql);
                Ok(CandidateQuery::new(question, sql, attempt))
            }
            None => {
                warn!("Completion contained no SQL statement");
                let preview: String = completion.chars().take(200).collect();
                Err(LlmError::MalformedCompletion(preview))
            }
        }
    }

    pub async fn explain(&self, sql: &str) -> Result<String, LlmError> {
        let prompt = self.prompts.explain(sql)?;
        let explanation = self.provider.complete(&prompt).await?;
        Ok(explanation.trim().to_string())
    }
}
