//! Step Modules
//!
//! LLM-backed implementations of the four `StepModule` contracts used by the
//! orchestration graph, plus the deterministic keyword router and the SQL
//! prompt bundle.
//!
//! Every step goes through [`complete`], which maps backend errors onto
//! `StepError`: infrastructure problems (server down, auth, rate limits)
//! become `Unavailable`, request timeouts become `Timeout`, anything else
//! becomes a `ContractViolation`.

pub mod json;
pub mod planner;
pub mod prompt;
pub mod router;
pub mod sql_generator;
pub mod synthesizer;

use std::sync::Arc;

use retail_copilot_core::{DynStep, Route, RouteInput, StepError, StepResult};
use retail_copilot_llm::{LlmError, LlmProvider, LlmRequestOptions, Message};

use crate::models::settings::{AppConfig, RouterKind};
use crate::services::graph::StepSet;
use crate::utils::error::AppResult;

pub use planner::LlmPlanner;
pub use prompt::{PromptBundle, SqlExemplar};
pub use router::{KeywordRouter, LlmRouter};
pub use sql_generator::LlmSqlGenerator;
pub use synthesizer::LlmSynthesizer;

/// Send one prompt and return the raw response text.
pub(crate) async fn complete(
    provider: &dyn LlmProvider,
    step: &'static str,
    system: &str,
    prompt: String,
    options: LlmRequestOptions,
) -> StepResult<String> {
    let response = provider
        .send_message(vec![Message::user(prompt)], Some(system.to_string()), options)
        .await
        .map_err(|e| map_llm_error(step, e))?;

    if response.is_truncated() {
        tracing::debug!(step, "model output hit the token limit");
    }
    let text = response.text().trim().to_string();
    if text.is_empty() {
        return Err(StepError::contract(step, "empty model output"));
    }
    Ok(text)
}

fn map_llm_error(step: &'static str, error: LlmError) -> StepError {
    if let LlmError::Timeout { seconds } = error {
        StepError::Timeout {
            step: step.to_string(),
            seconds,
        }
    } else if error.is_infrastructure() {
        StepError::unavailable(step, error.to_string())
    } else {
        StepError::contract(step, error.to_string())
    }
}

/// Wire the configured step implementations around one provider.
pub fn build_step_set(config: &AppConfig, provider: Arc<dyn LlmProvider>) -> AppResult<StepSet> {
    let bundle = match &config.steps.sql_prompt_bundle {
        Some(path) => PromptBundle::load(path)?,
        None => PromptBundle::default(),
    };
    tracing::info!(
        model = provider.model(),
        router = ?config.steps.router,
        bundle = %bundle.version,
        "configured step modules"
    );

    let router: DynStep<RouteInput, Route> = match config.steps.router {
        RouterKind::Llm => Arc::new(LlmRouter::new(Arc::clone(&provider))),
        RouterKind::Keyword => Arc::new(KeywordRouter),
    };

    Ok(StepSet {
        router,
        planner: Arc::new(LlmPlanner::new(Arc::clone(&provider))),
        sql_generator: Arc::new(LlmSqlGenerator::new(Arc::clone(&provider), bundle)),
        synthesizer: Arc::new(LlmSynthesizer::new(provider)),
    })
}
