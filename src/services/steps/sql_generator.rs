//! SQL-Generator
//!
//! Produces one SQLite query from the schema, the planned constraints and,
//! on a repair pass, the previous query with its failure reason. Output is
//! checked at the boundary: every FROM/JOIN table and every column it
//! references must exist in the schema.

use std::sync::Arc;

use async_trait::async_trait;
use retail_copilot_core::{SqlGenInput, StepError, StepModule, StepResult};
use retail_copilot_llm::{LlmProvider, LlmRequestOptions};

use super::complete;
use super::json::strip_code_fences;
use super::prompt::PromptBundle;
use crate::storage::sql_guard::{referenced_tables, unknown_columns};

pub struct LlmSqlGenerator {
    provider: Arc<dyn LlmProvider>,
    bundle: PromptBundle,
}

impl LlmSqlGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, bundle: PromptBundle) -> Self {
        Self { provider, bundle }
    }

    pub fn bundle(&self) -> &PromptBundle {
        &self.bundle
    }

    fn build_prompt(&self, input: &SqlGenInput) -> String {
        let mut prompt = format!("Schema:\n{}\n\n", input.schema.render());
        if !self.bundle.exemplars.is_empty() {
            prompt.push_str("Examples:\n");
            prompt.push_str(&self.bundle.render_exemplars());
            prompt.push_str("\n\n");
        }
        prompt.push_str(&format!(
            "Question: {}\nConstraints: {}\n",
            input.question,
            input.constraints.to_json()
        ));
        if let Some(previous) = &input.previous_query {
            prompt.push_str(&format!("\nPrevious SQL: {}\n", previous));
        }
        if let Some(reason) = &input.failure_reason {
            prompt.push_str(&format!(
                "It failed with: {}\nWrite a corrected query.\n",
                reason
            ));
        }
        prompt.push_str("SQL:");
        prompt
    }
}

/// Pull the query out of a model reply: fences, a `SQL:` label and any
/// leading prose are removed.
pub fn extract_query(reply: &str) -> String {
    let cleaned = strip_code_fences(reply);
    let mut text = cleaned.trim();
    if let Some(rest) = text
        .get(..4)
        .filter(|p| p.eq_ignore_ascii_case("sql:"))
        .and_then(|_| text.get(4..))
    {
        text = rest.trim_start();
    }
    let lower = text.to_ascii_lowercase();
    if !(lower.starts_with("select") || lower.starts_with("with")) {
        if let Some(pos) = lower.find("select ") {
            text = &text[pos..];
        }
    }
    text.trim().to_string()
}

#[async_trait]
impl StepModule for LlmSqlGenerator {
    type Input = SqlGenInput;
    type Output = String;

    fn name(&self) -> &'static str {
        "sql_generator"
    }

    async fn invoke(&self, input: SqlGenInput) -> StepResult<String> {
        let prompt = self.build_prompt(&input);
        let reply = complete(
            self.provider.as_ref(),
            self.name(),
            &self.bundle.instructions,
            prompt,
            LlmRequestOptions::default(),
        )
        .await?;

        let query = extract_query(&reply);
        if query.is_empty() {
            return Err(StepError::contract(self.name(), "no query in reply"));
        }

        let tables = referenced_tables(&query);
        if tables.is_empty() {
            return Err(StepError::contract(self.name(), "query references no tables"));
        }
        let unknown: Vec<&str> = tables
            .iter()
            .map(String::as_str)
            .filter(|t| input.schema.find_table(t).is_none())
            .collect();
        if !unknown.is_empty() {
            return Err(StepError::contract(
                self.name(),
                format!("unknown table(s): {}", unknown.join(", ")),
            ));
        }
        let columns = unknown_columns(&query, &input.schema);
        if !columns.is_empty() {
            return Err(StepError::contract(
                self.name(),
                format!("unknown column(s): {}", columns.join(", ")),
            ));
        }

        tracing::debug!(?tables, "generated sql");
        Ok(query)
    }
}
