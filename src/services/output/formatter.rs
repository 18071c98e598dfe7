//! Output Formatter
//!
//! Freezes a terminal `RunState` into the batch output record.

use serde_json::Value;

use super::format_hint::FormatHint;
use crate::models::batch::{OutputRecord, NO_SQL};
use crate::services::graph::policy::citation_scope;
use crate::services::graph::state::{RunState, RunStatus};

/// Build the output record for a finished run.
///
/// Done runs carry the accepted answer, normalized to the format hint, and
/// citations in their canonical spelling. Anything else reports a null
/// answer, zero confidence and the failure reason.
pub fn format_record(state: &RunState) -> OutputRecord {
    // after a failed regeneration the last executed query is in previous_sql
    let sql = match state.route() {
        Some(route) if route.uses_sql() => state
            .sql_query
            .as_ref()
            .or(state.previous_sql.as_ref())
            .cloned()
            .unwrap_or_else(|| NO_SQL.to_string()),
        _ => NO_SQL.to_string(),
    };

    if state.status() != RunStatus::Done {
        let explanation = if state.explanation.is_empty() {
            state
                .last_failure
                .clone()
                .unwrap_or_else(|| "run did not finish".to_string())
        } else {
            state.explanation.clone()
        };
        return OutputRecord {
            id: state.id.clone(),
            final_answer: Value::Null,
            sql,
            confidence: 0.0,
            explanation,
            citations: Vec::new(),
        };
    }

    let hint = FormatHint::parse(&state.format_hint);
    let final_answer = state
        .final_answer
        .as_ref()
        .map(|answer| hint.normalize(answer))
        .unwrap_or(Value::Null);

    let scope = citation_scope(state);
    let mut citations: Vec<String> = Vec::new();
    for citation in &state.citations {
        let canonical = scope.resolve(citation).unwrap_or(citation.as_str()).to_string();
        if !citations.contains(&canonical) {
            citations.push(canonical);
        }
    }

    let confidence = if state.confidence.is_finite() {
        state.confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };

    OutputRecord {
        id: state.id.clone(),
        final_answer,
        sql,
        confidence,
        explanation: state.explanation.clone(),
        citations,
    }
}
