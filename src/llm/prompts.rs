use minijinja::{context, Environment};
use tracing::debug;

use crate::llm::models::CorrectionContext;
use crate::llm::LlmError;

/// Prompt templates for translation, correction and explanation.
pub struct PromptLibrary {
    env: Environment<'static>,
}

impl PromptLibrary {
    pub fn new() -> Result<Self, LlmError> {
        let mut env = Environment::new();

        for (name, source) in [
            ("generate.txt", include_str!("../../templates/prompts/generate.txt")),
            ("correct.txt", include_str!("../../templates/prompts/correct.txt")),
            ("explain.txt", include_str!("../../templates/prompts/explain.txt")),
        ] {
            env.add_template(name, source)
                .map_err(|e| LlmError::TemplateError(format!("{}: {}", name, e)))?;
        }

        Ok(Self { env })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String, LlmError> {
        let prompt = self
            .env
            .get_template(name)
            .and_then(|tmpl| tmpl.render(ctx))
            .map_err(|e| LlmError::TemplateError(format!("{}: {}", name, e)))?;

        debug!("Prepared {} prompt: {}", name, prompt);
        Ok(prompt)
    }

    pub fn generate(&self, question: &str, schema: &str) -> Result<String, LlmError> {
        self.render("generate.txt", context! { question, schema })
    }

    pub fn correct(
        &self,
        question: &str,
        schema: &str,
        correction: &CorrectionContext,
    ) -> Result<String, LlmError> {
        let issues: Vec<String> = correction.issues.iter().map(|i| i.to_string()).collect();
        self.render(
            "correct.txt",
            context! {
                question,
                schema,
                previous_sql => correction.previous_sql.as_deref(),
                issues,
            },
        )
    }

    pub fn explain(&self, sql: &str) -> Result<String, LlmError> {
        self.render("explain.txt", context! { sql })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::ValidationIssue;

    const SCHEMA: &str = "CREATE TABLE \"coins\" (\n    \"coin\" TEXT\n);";

    #[test]
    fn test_generate_prompt_embeds_schema_and_question() {
        let prompts = PromptLibrary::new().unwrap();
        let prompt = prompts.generate("Top 5 coins by market cap in 2021", SCHEMA).unwrap();

        assert!(prompt.contains("CREATE TABLE \"coins\""));
        assert!(prompt.contains("Question: Top 5 coins by market cap in 2021"));
        assert!(prompt.contains("Do NOT make up tables or columns."));
        assert!(prompt.trim_end().ends_with("SQL:"));
    }

    #[test]
    fn test_correct_prompt_lists_issues_and_previous_sql() {
        let prompts = PromptLibrary::new().unwrap();
        let correction = CorrectionContext {
            previous_sql: Some("SELECT * FROM prices".to_string()),
            issues: vec![
                ValidationIssue::MissingTable("prices".to_string()),
                ValidationIssue::MultipleStatements,
            ],
        };

        let prompt = prompts.correct("price of bitcoin", SCHEMA, &correction).unwrap();
        assert!(prompt.contains("SELECT * FROM prices"));
        assert!(prompt.contains("- table `prices` does not exist\n"));
        assert!(prompt.contains("- only a single statement is allowed\n"));
        assert!(prompt.contains(SCHEMA));
        assert!(prompt.contains("Question: price of bitcoin"));
    }

    #[test]
    fn test_correct_prompt_without_previous_sql() {
        let prompts = PromptLibrary::new().unwrap();
        let correction = CorrectionContext {
            previous_sql: None,
            issues: vec![ValidationIssue::Malformed("no statement".to_string())],
        };

        let prompt = prompts.correct("q", SCHEMA, &correction).unwrap();
        assert!(prompt.starts_with("Your previous answer did not contain a SQL query."));
    }

    #[test]
    fn test_explain_prompt() {
        let prompts = PromptLibrary::new().unwrap();
        let prompt = prompts.explain("SELECT coin FROM coins").unwrap();
        assert!(prompt.ends_with("SELECT coin FROM coins"));
    }
}
