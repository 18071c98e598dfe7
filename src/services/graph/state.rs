//! Run State
//!
//! The per-question record threaded through the graph. Fields whose
//! invariants matter (route set once, repair count capped, context
//! append-only) are private and changed only through methods that enforce
//! them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use retail_copilot_core::{
    Constraints, RetrievedChunk, Route, SqlEvidence, SynthesisOutput,
};

use super::node::NodeId;
use crate::models::batch::QuestionId;
use crate::storage::gateway::QueryFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairTarget {
    #[default]
    None,
    Sql,
    Synth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Running,
    Done,
    Failed,
}

/// Result of the execute_sql node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SqlOutcome {
    Success {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
        /// Schema tables the query touched.
        tables: Vec<String>,
    },
    Failure { failure: QueryFailure },
}

impl SqlOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SqlOutcome::Success { .. })
    }

    pub fn failure_reason(&self) -> Option<String> {
        match self {
            SqlOutcome::Success { .. } => None,
            SqlOutcome::Failure { failure } => Some(failure.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub id: QuestionId,
    pub question: String,
    pub format_hint: String,
    route: Option<Route>,
    retrieved_context: Vec<RetrievedChunk>,
    pub constraints: Constraints,
    pub sql_query: Option<String>,
    pub sql_result: Option<SqlOutcome>,
    /// Query cleared by the last sql repair; shown to the generator.
    pub previous_sql: Option<String>,
    pub draft: Option<SynthesisOutput>,
    pub final_answer: Option<Value>,
    pub explanation: String,
    pub confidence: f64,
    pub citations: Vec<String>,
    repair_count: u32,
    pub repair_target: RepairTarget,
    synth_repairs: u32,
    status: RunStatus,
    pub last_failure: Option<String>,
    pub trace: Vec<NodeId>,
}

impl RunState {
    pub fn new(id: impl Into<QuestionId>, question: impl Into<String>, format_hint: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            id: id.into(),
            question: question.into(),
            format_hint: format_hint.into(),
            route: None,
            retrieved_context: Vec::new(),
            constraints: Constraints::new(),
            sql_query: None,
            sql_result: None,
            previous_sql: None,
            draft: None,
            final_answer: None,
            explanation: String::new(),
            confidence: 0.0,
            citations: Vec::new(),
            repair_count: 0,
            repair_target: RepairTarget::None,
            synth_repairs: 0,
            status: RunStatus::Running,
            last_failure: None,
            trace: Vec::new(),
        }
    }

    pub fn route(&self) -> Option<Route> {
        self.route
    }

    /// Record the route. A second assignment is refused.
    pub fn set_route(&mut self, route: Route) -> Result<(), String> {
        match self.route {
            Some(existing) => Err(format!("route already set to {}", existing)),
            None => {
                self.route = Some(route);
                Ok(())
            }
        }
    }

    pub fn retrieved_context(&self) -> &[RetrievedChunk] {
        &self.retrieved_context
    }

    pub fn append_context(&mut self, chunks: impl IntoIterator<Item = RetrievedChunk>) {
        self.retrieved_context.extend(chunks);
    }

    pub fn repair_count(&self) -> u32 {
        self.repair_count
    }

    pub fn synth_repairs(&self) -> u32 {
        self.synth_repairs
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status != RunStatus::Running
    }

    /// Evidence handed to the Synthesizer for the SQL leg, if it ran.
    pub fn sql_evidence(&self) -> Option<SqlEvidence> {
        let outcome = self.sql_result.as_ref()?;
        Some(match outcome {
            SqlOutcome::Success {
                columns,
                rows,
                tables,
            } => SqlEvidence::Rows {
                query: self.sql_query.clone().unwrap_or_default(),
                columns: columns.clone(),
                rows: rows.clone(),
                tables: tables.clone(),
            },
            SqlOutcome::Failure { failure } => SqlEvidence::Failed {
                query: self.sql_query.clone(),
                reason: failure.to_string(),
            },
        })
    }

    /// Tables the executed query touched; empty unless it succeeded.
    pub fn touched_tables(&self) -> &[String] {
        match &self.sql_result {
            Some(SqlOutcome::Success { tables, .. }) => tables,
            _ => &[],
        }
    }

    /// Apply the repair recorded in `repair_target`.
    ///
    /// Increments `repair_count` and clears only the target's fields; route,
    /// constraints and retrieved context are never touched.
    pub fn apply_repair(&mut self, max_repairs: u32) -> Result<(), String> {
        if self.repair_count >= max_repairs {
            return Err(format!("repair budget of {} exhausted", max_repairs));
        }
        match self.repair_target {
            RepairTarget::None => return Err("repair requested without a target".to_string()),
            RepairTarget::Sql => {
                // a generator failure leaves no new query; keep the last one
                if let Some(query) = self.sql_query.take() {
                    self.previous_sql = Some(query);
                }
                self.sql_result = None;
                self.draft = None;
            }
            RepairTarget::Synth => {
                self.draft = None;
                self.synth_repairs += 1;
            }
        }
        self.repair_count += 1;
        Ok(())
    }

    /// Accept the current draft as the final answer.
    pub fn finish_done(&mut self) -> Result<(), String> {
        let draft = self
            .draft
            .take()
            .ok_or_else(|| "no draft to accept".to_string())?;
        self.final_answer = Some(draft.final_answer);
        self.explanation = draft.explanation;
        self.confidence = draft.confidence;
        self.citations = draft.citations;
        self.status = RunStatus::Done;
        Ok(())
    }

    /// End the run as failed, keeping the reason as the explanation.
    pub fn finish_failed(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.final_answer = None;
        self.confidence = 0.0;
        self.citations.clear();
        self.explanation = reason.clone();
        self.last_failure = Some(reason);
        self.status = RunStatus::Failed;
    }
}
