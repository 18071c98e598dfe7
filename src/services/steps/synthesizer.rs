//! Synthesizer
//!
//! Turns retrieved passages and SQL evidence into a draft answer. The step
//! only guarantees the draft parses; type, confidence range and citation
//! checks happen in the graph against the run's actual evidence.

use std::sync::Arc;

use async_trait::async_trait;
use retail_copilot_core::{
    SqlEvidence, StepError, StepModule, StepResult, SynthesisInput, SynthesisOutput,
};
use retail_copilot_llm::{LlmProvider, LlmRequestOptions};
use serde_json::Value;

use super::complete;
use super::json::extract_json_object;
use super::planner::render_context;

/// Rows shown to the model; the rest are summarized as a count.
const MAX_PROMPT_ROWS: usize = 20;

const SYNTHESIZER_SYSTEM_PROMPT: &str = r#"You answer retail analytics questions from the evidence provided.

Return a JSON object with:
- "final_answer": the answer, shaped exactly as the format hint says (int, float, str, list[...], {field:type})
- "explanation": at most two sentences
- "confidence": a number between 0 and 1
- "citations": ids of the document chunks (e.g. "kpi_definitions::chunk1") and database tables (e.g. "Orders") you used

Cite only chunk ids and tables that appear in the evidence. Return ONLY the JSON object."#;

fn render_sql_evidence(evidence: Option<&SqlEvidence>) -> String {
    match evidence {
        None => "(not used)".to_string(),
        Some(SqlEvidence::Failed { query, reason }) => format!(
            "Query {} failed: {}",
            query.as_deref().unwrap_or("(none)"),
            reason
        ),
        Some(SqlEvidence::Rows {
            query,
            columns,
            rows,
            tables,
        }) => {
            let mut out = format!(
                "Query: {}\nTables: {}\nColumns: {}\n",
                query,
                tables.join(", "),
                columns.join(", ")
            );
            for row in rows.iter().take(MAX_PROMPT_ROWS) {
                out.push_str(&Value::Array(row.clone()).to_string());
                out.push('\n');
            }
            if rows.len() > MAX_PROMPT_ROWS {
                out.push_str(&format!("... {} more rows\n", rows.len() - MAX_PROMPT_ROWS));
            }
            out
        }
    }
}

pub struct LlmSynthesizer {
    provider: Arc<dyn LlmProvider>,
}

impl LlmSynthesizer {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl StepModule for LlmSynthesizer {
    type Input = SynthesisInput;
    type Output = SynthesisOutput;

    fn name(&self) -> &'static str {
        "synthesizer"
    }

    async fn invoke(&self, input: SynthesisInput) -> StepResult<SynthesisOutput> {
        let mut prompt = format!(
            "Question: {}\nFormat hint: {}\n\nDocuments:\n{}\n\nSQL result:\n{}\n",
            input.question,
            input.format_hint,
            render_context(&input.context),
            render_sql_evidence(input.sql.as_ref()),
        );
        if !input.constraints.is_empty() {
            prompt.push_str(&format!("\nConstraints: {}\n", input.constraints.to_json()));
        }
        if let Some(feedback) = &input.feedback {
            prompt.push_str(&format!(
                "\nYour previous answer was rejected: {}\nFix it.\n",
                feedback
            ));
        }
        prompt.push_str("\nAnswer JSON:");

        let reply = complete(
            self.provider.as_ref(),
            self.name(),
            SYNTHESIZER_SYSTEM_PROMPT,
            prompt,
            LlmRequestOptions::json(),
        )
        .await?;

        let object = extract_json_object(&reply)
            .ok_or_else(|| StepError::contract(self.name(), "reply is not a JSON object"))?;
        serde_json::from_value(Value::Object(object))
            .map_err(|e| StepError::contract(self.name(), format!("malformed answer: {}", e)))
    }
}
