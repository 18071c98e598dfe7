//! Router
//!
//! Classifies a question into `rag`, `sql` or `hybrid`. The LLM router
//! accepts exactly one label; anything else is a contract violation.
//! The keyword router is deterministic and needs no model.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use retail_copilot_core::{Route, RouteInput, StepError, StepModule, StepResult};
use retail_copilot_llm::{LlmProvider, LlmRequestOptions};

use super::complete;
use super::json::strip_code_fences;

const ROUTER_SYSTEM_PROMPT: &str = r#"You route retail analytics questions.

Labels:
- rag: answerable from the policy, KPI and marketing documents alone (definitions, return windows, campaign dates)
- sql: needs only numbers from the Northwind database, no document knowledge
- hybrid: needs document knowledge (a date range, a KPI formula) applied to database numbers

Reply with exactly one word: rag, sql or hybrid."#;

/// Parse a router reply. Tolerates quoting, a trailing period and a
/// `route:` prefix; any other text is rejected.
pub fn parse_route_label(text: &str) -> Option<Route> {
    let cleaned = strip_code_fences(text);
    let cleaned = cleaned.trim_matches(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '.'));
    let label = match cleaned.split_once(':') {
        Some((prefix, rest)) if prefix.trim().eq_ignore_ascii_case("route") => {
            rest.trim_matches(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '.'))
        }
        _ => cleaned,
    };
    label.parse().ok()
}

// ---------------------------------------------------------------------------
// LlmRouter
// ---------------------------------------------------------------------------

pub struct LlmRouter {
    provider: Arc<dyn LlmProvider>,
}

impl LlmRouter {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl StepModule for LlmRouter {
    type Input = RouteInput;
    type Output = Route;

    fn name(&self) -> &'static str {
        "router"
    }

    async fn invoke(&self, input: RouteInput) -> StepResult<Route> {
        let prompt = format!(
            "Question: {}\n\nRetrieved context preview:\n{}\n\nLabel:",
            input.question,
            if input.context_preview.is_empty() { "(none)" } else { &input.context_preview }
        );
        let reply = complete(
            self.provider.as_ref(),
            self.name(),
            ROUTER_SYSTEM_PROMPT,
            prompt,
            LlmRequestOptions::default(),
        )
        .await?;

        parse_route_label(&reply).ok_or_else(|| {
            let shown: String = reply.chars().take(80).collect();
            StepError::contract(self.name(), format!("expected rag, sql or hybrid, got {:?}", shown))
        })
    }
}

// ---------------------------------------------------------------------------
// KeywordRouter
// ---------------------------------------------------------------------------

struct KeywordRules {
    all_time: Regex,
    metric: Regex,
}

/// Compiled once; `None` if a pattern fails to compile.
fn keyword_rules() -> Option<&'static KeywordRules> {
    static RULES: OnceLock<Option<KeywordRules>> = OnceLock::new();
    RULES
        .get_or_init(|| {
            Some(KeywordRules {
                all_time: Regex::new(r"(?i)\ball[- ]time\b").ok()?,
                metric: Regex::new(
                    r"(?i)\b(revenue|sold|customers?|categor(y|ies)|aov|average order value|margin|quantity)\b",
                )
                .ok()?,
            })
        })
        .as_ref()
}

/// Deterministic router for offline runs.
///
/// All-time rankings need no document context, so they go straight to `sql`.
/// Other metric questions are `hybrid`; everything else is `rag`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordRouter;

impl KeywordRouter {
    pub fn classify(question: &str) -> Route {
        let Some(rules) = keyword_rules() else {
            return Route::Hybrid;
        };
        if rules.all_time.is_match(question) {
            Route::Sql
        } else if rules.metric.is_match(question) {
            Route::Hybrid
        } else {
            Route::Rag
        }
    }
}

#[async_trait]
impl StepModule for KeywordRouter {
    type Input = RouteInput;
    type Output = Route;

    fn name(&self) -> &'static str {
        "keyword_router"
    }

    async fn invoke(&self, input: RouteInput) -> StepResult<Route> {
        Ok(Self::classify(&input.question))
    }
}
