//! Transition Policy
//!
//! Pure functions from run state and the node that just ran to what the
//! executor does next. Nothing here mutates state or performs I/O.

use super::node::NodeId;
use super::state::{RepairTarget, RunState};
use crate::models::settings::GraphSettings;
use crate::services::output::format_hint::FormatHint;
use crate::services::output::validation::{validate_draft, CitationScope};

/// Repair budgets enforced by the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairLimits {
    pub max_repairs: u32,
    pub max_synth_repairs: u32,
}

impl From<&GraphSettings> for RepairLimits {
    fn from(settings: &GraphSettings) -> Self {
        Self {
            max_repairs: settings.max_repairs,
            max_synth_repairs: settings.max_synth_repairs,
        }
    }
}

impl RepairLimits {
    /// Upper bound on node executions for one run: the six forward nodes,
    /// then repair, generate_sql, execute_sql and synthesize per repair.
    pub fn max_node_visits(&self) -> usize {
        6 + 4 * self.max_repairs as usize
    }
}

/// What the executor should do after a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Next(NodeId),
    Repair { target: RepairTarget, reason: String },
    Done,
    Failed(String),
}

/// A node that did not complete.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeFailure {
    pub reason: String,
    /// Infrastructure failure; never repaired.
    pub fatal: bool,
}

impl NodeFailure {
    pub fn recoverable(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            fatal: false,
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            fatal: true,
        }
    }
}

/// Citations the run's evidence supports.
pub fn citation_scope(state: &RunState) -> CitationScope {
    CitationScope::new(
        state.retrieved_context().iter().map(|c| c.chunk_id.clone()),
        state.touched_tables().iter().cloned(),
    )
}

fn budget_left(state: &RunState, limits: &RepairLimits) -> bool {
    state.repair_count() < limits.max_repairs
}

fn synth_budget_left(state: &RunState, limits: &RepairLimits) -> bool {
    budget_left(state, limits) && state.synth_repairs() < limits.max_synth_repairs
}

fn exhausted(state: &RunState, reason: &str) -> String {
    format!(
        "repair budget exhausted after {} repair(s); last failure: {}",
        state.repair_count(),
        reason
    )
}

/// Transition after `last` completed successfully.
pub fn next_node(state: &RunState, last: NodeId, limits: &RepairLimits) -> Transition {
    match last {
        NodeId::Retrieve => Transition::Next(NodeId::Route),
        NodeId::Route => match state.route() {
            Some(route) if route.uses_sql() => Transition::Next(NodeId::Plan),
            Some(_) => Transition::Next(NodeId::Synthesize),
            None => Transition::Failed("route node produced no route".to_string()),
        },
        NodeId::Plan => Transition::Next(NodeId::GenerateSql),
        NodeId::GenerateSql => Transition::Next(NodeId::ExecuteSql),
        NodeId::ExecuteSql => Transition::Next(NodeId::Synthesize),
        NodeId::Synthesize => after_synthesis(state, limits),
        NodeId::Repair => match state.repair_target {
            RepairTarget::Sql => Transition::Next(NodeId::GenerateSql),
            RepairTarget::Synth => Transition::Next(NodeId::Synthesize),
            RepairTarget::None => Transition::Failed("repair ran without a target".to_string()),
        },
    }
}

fn after_synthesis(state: &RunState, limits: &RepairLimits) -> Transition {
    let Some(draft) = &state.draft else {
        return Transition::Failed("synthesize produced no draft".to_string());
    };

    let sql_failure = match state.route() {
        Some(route) if route.uses_sql() => match &state.sql_result {
            Some(outcome) => outcome.failure_reason(),
            None => Some("query was not executed".to_string()),
        },
        _ => None,
    };
    if let Some(reason) = &sql_failure {
        if budget_left(state, limits) {
            return Transition::Repair {
                target: RepairTarget::Sql,
                reason: reason.clone(),
            };
        }
    }

    let verdict = validate_draft(
        draft,
        &FormatHint::parse(&state.format_hint),
        &citation_scope(state),
    );
    if let Err(violation) = &verdict {
        if synth_budget_left(state, limits) {
            return Transition::Repair {
                target: RepairTarget::Synth,
                reason: violation.clone(),
            };
        }
    }

    match (sql_failure, verdict) {
        (None, Ok(())) => Transition::Done,
        (Some(reason), _) | (None, Err(reason)) => Transition::Failed(exhausted(state, &reason)),
    }
}

/// Transition after `node` failed.
///
/// SQL nodes map to an sql repair and synthesize to a synth repair while the
/// budget allows. Everything else, and every fatal failure, ends the run.
pub fn on_failure(
    state: &RunState,
    node: NodeId,
    failure: &NodeFailure,
    limits: &RepairLimits,
) -> Transition {
    if failure.fatal {
        return Transition::Failed(failure.reason.clone());
    }
    match node {
        NodeId::GenerateSql | NodeId::ExecuteSql if budget_left(state, limits) => Transition::Repair {
            target: RepairTarget::Sql,
            reason: failure.reason.clone(),
        },
        NodeId::Synthesize if synth_budget_left(state, limits) => Transition::Repair {
            target: RepairTarget::Synth,
            reason: failure.reason.clone(),
        },
        NodeId::GenerateSql | NodeId::ExecuteSql | NodeId::Synthesize => {
            Transition::Failed(exhausted(state, &failure.reason))
        }
        _ => Transition::Failed(failure.reason.clone()),
    }
}
