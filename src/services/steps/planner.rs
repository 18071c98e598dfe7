//! Planner
//!
//! Extracts query constraints (date ranges, category, KPI formula, cost
//! ratio, row limit) from the question and retrieved documents.

use std::sync::Arc;

use async_trait::async_trait;
use retail_copilot_core::{
    Constraints, PlanInput, RetrievedChunk, StepError, StepModule, StepResult,
};
use retail_copilot_llm::{LlmProvider, LlmRequestOptions};

use super::complete;
use super::json::extract_json_object;

const PLANNER_SYSTEM_PROMPT: &str = r#"You extract query constraints for a retail analytics question.

Return a JSON object using only these keys, omitting any that do not apply:
- "start_date", "end_date": inclusive ISO dates (YYYY-MM-DD), e.g. from a campaign in the marketing calendar
- "category": product category name
- "kpi": KPI identifier such as "average_order_value", "gross_margin", "revenue", "quantity_sold"
- "cost_ratio": cost of goods as a fraction of unit price when the documents or question give an approximation
- "limit": number of rows for ranking questions

Return ONLY the JSON object."#;

pub(crate) fn render_context(context: &[RetrievedChunk]) -> String {
    if context.is_empty() {
        return "(no documents retrieved)".to_string();
    }
    context
        .iter()
        .map(|c| format!("[{}]\n{}", c.chunk_id, c.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub struct LlmPlanner {
    provider: Arc<dyn LlmProvider>,
}

impl LlmPlanner {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl StepModule for LlmPlanner {
    type Input = PlanInput;
    type Output = Constraints;

    fn name(&self) -> &'static str {
        "planner"
    }

    async fn invoke(&self, input: PlanInput) -> StepResult<Constraints> {
        let prompt = format!(
            "Documents:\n{}\n\nQuestion: {}\n\nConstraints JSON:",
            render_context(&input.context),
            input.question
        );
        let reply = complete(
            self.provider.as_ref(),
            self.name(),
            PLANNER_SYSTEM_PROMPT,
            prompt,
            LlmRequestOptions::json(),
        )
        .await?;

        let object = extract_json_object(&reply)
            .ok_or_else(|| StepError::contract(self.name(), "reply is not a JSON object"))?;
        let (constraints, dropped) = Constraints::from_json_object(&object);
        if !dropped.is_empty() {
            tracing::debug!(?dropped, "planner dropped unrecognized constraints");
        }
        Ok(constraints)
    }
}
