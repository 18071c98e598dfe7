//! Graph Executor
//!
//! Drives one run through the node graph:
//! - sequential node execution, each under a per-node timeout
//! - transitions decided by the pure policy in `policy.rs`
//! - bounded repair loop (sql / synth targets)
//! - run-level cancellation and a hard step guard
//!
//! Every failure is absorbed into the returned `RunState`; `run` never errors.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use retail_copilot_core::{
    Constraints, DynStep, PlanInput, RetrievedChunk, Route, RouteInput, SqlGenInput, StepError,
    SynthesisInput, SynthesisOutput,
};

use super::node::NodeId;
use super::policy::{self, NodeFailure, RepairLimits, Transition};
use super::state::{RepairTarget, RunState, SqlOutcome};
use crate::models::batch::QuestionId;
use crate::models::settings::GraphSettings;
use crate::services::knowledge::DocumentIndex;
use crate::storage::gateway::{GatewayError, StructuredStoreGateway};
use crate::storage::sql_guard::tables_touched;

/// The four step modules a run needs.
#[derive(Clone)]
pub struct StepSet {
    pub router: DynStep<RouteInput, Route>,
    pub planner: DynStep<PlanInput, Constraints>,
    pub sql_generator: DynStep<SqlGenInput, String>,
    pub synthesizer: DynStep<SynthesisInput, SynthesisOutput>,
}

#[derive(Clone)]
pub struct GraphExecutor {
    steps: StepSet,
    index: Arc<dyn DocumentIndex>,
    gateway: Arc<dyn StructuredStoreGateway>,
    settings: GraphSettings,
    limits: RepairLimits,
}

fn step_failure(error: StepError) -> NodeFailure {
    NodeFailure {
        fatal: error.is_infrastructure(),
        reason: error.to_string(),
    }
}

/// First `max_chars` characters of the retrieved passages.
fn context_preview(context: &[RetrievedChunk], max_chars: usize) -> String {
    let joined = context
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    joined.chars().take(max_chars).collect()
}

impl GraphExecutor {
    pub fn new(
        steps: StepSet,
        index: Arc<dyn DocumentIndex>,
        gateway: Arc<dyn StructuredStoreGateway>,
        settings: GraphSettings,
    ) -> Self {
        let limits = RepairLimits::from(&settings);
        Self {
            steps,
            index,
            gateway,
            settings,
            limits,
        }
    }

    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    /// Answer one question. Always returns a terminal state.
    pub async fn run(
        &self,
        id: impl Into<QuestionId>,
        question: impl Into<String>,
        format_hint: impl Into<String>,
        cancel: &CancellationToken,
    ) -> RunState {
        let mut state = RunState::new(id, question, format_hint);
        let span = tracing::info_span!("run", run_id = %state.run_id, id = %state.id);
        self.drive(&mut state, cancel).instrument(span).await;
        state
    }

    async fn drive(&self, state: &mut RunState, cancel: &CancellationToken) {
        let max_visits = self.limits.max_node_visits();
        let mut next = Some(NodeId::Retrieve);

        while let Some(node) = next {
            if cancel.is_cancelled() {
                state.finish_failed("run cancelled");
                break;
            }
            if state.trace.len() >= max_visits {
                state.finish_failed(format!("step limit of {} nodes exceeded", max_visits));
                break;
            }

            state.trace.push(node);
            tracing::debug!(node = %node, repair_count = state.repair_count(), "executing node");

            let transition = match self.run_node(node, state, cancel).await {
                Ok(()) => policy::next_node(state, node, &self.limits),
                Err(failure) => {
                    tracing::warn!(
                        node = %node,
                        fatal = failure.fatal,
                        reason = %failure.reason,
                        "node failed"
                    );
                    policy::on_failure(state, node, &failure, &self.limits)
                }
            };
            next = self.apply(state, transition);
        }

        tracing::info!(
            status = ?state.status(),
            route = ?state.route(),
            repair_count = state.repair_count(),
            nodes = state.trace.len(),
            "run finished"
        );
    }

    fn apply(&self, state: &mut RunState, transition: Transition) -> Option<NodeId> {
        match transition {
            Transition::Next(node) => Some(node),
            Transition::Repair { target, reason } => {
                tracing::info!(repair_target = ?target, reason = %reason, "requesting repair");
                state.repair_target = target;
                state.last_failure = Some(reason);
                Some(NodeId::Repair)
            }
            Transition::Done => {
                if let Err(reason) = state.finish_done() {
                    state.finish_failed(reason);
                }
                None
            }
            Transition::Failed(reason) => {
                state.finish_failed(reason);
                None
            }
        }
    }

    /// Run one node under the node timeout, abandoning it on cancellation.
    async fn run_node(
        &self,
        node: NodeId,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<(), NodeFailure> {
        let seconds = self.settings.node_timeout_secs;
        tokio::select! {
            _ = cancel.cancelled() => Err(NodeFailure::fatal("run cancelled")),
            result = tokio::time::timeout(Duration::from_secs(seconds), self.execute_node(node, state)) => {
                result.unwrap_or_else(|_| {
                    Err(NodeFailure::recoverable(
                        StepError::Timeout {
                            step: node.to_string(),
                            seconds,
                        }
                        .to_string(),
                    ))
                })
            }
        }
    }

    /// Nodes write to `state` only after their awaited work completes, so an
    /// abandoned node leaves the state untouched.
    async fn execute_node(&self, node: NodeId, state: &mut RunState) -> Result<(), NodeFailure> {
        match node {
            NodeId::Retrieve => {
                let chunks: Vec<RetrievedChunk> =
                    self.index.search(&state.question, self.settings.top_k).collect();
                tracing::debug!(chunks = chunks.len(), "retrieved context");
                state.append_context(chunks);
            }
            NodeId::Route => {
                let input = RouteInput {
                    question: state.question.clone(),
                    context_preview: context_preview(
                        state.retrieved_context(),
                        self.settings.route_preview_chars,
                    ),
                };
                let route = self.steps.router.invoke(input).await.map_err(step_failure)?;
                state.set_route(route).map_err(NodeFailure::recoverable)?;
                tracing::info!(route = %route, "routed question");
            }
            NodeId::Plan => {
                let input = PlanInput {
                    question: state.question.clone(),
                    context: state.retrieved_context().to_vec(),
                };
                let constraints = self.steps.planner.invoke(input).await.map_err(step_failure)?;
                tracing::debug!(constraints = %constraints.to_json(), "planned constraints");
                state.constraints = constraints;
            }
            NodeId::GenerateSql => {
                let schema = self
                    .with_gateway(|g| g.describe_schema())
                    .await?
                    .map_err(gateway_failure)?;
                let input = SqlGenInput {
                    question: state.question.clone(),
                    constraints: state.constraints.clone(),
                    schema,
                    previous_query: state.previous_sql.clone(),
                    failure_reason: repair_signal(state, RepairTarget::Sql),
                };
                let query = self
                    .steps
                    .sql_generator
                    .invoke(input)
                    .await
                    .map_err(step_failure)?;
                state.sql_query = Some(query);
            }
            NodeId::ExecuteSql => {
                let query = state
                    .sql_query
                    .clone()
                    .ok_or_else(|| NodeFailure::recoverable("no query to execute"))?;
                let outcome = self.execute_query(query).await?;
                if let SqlOutcome::Failure { failure } = &outcome {
                    tracing::info!(failure = %failure, "query failed");
                }
                state.sql_result = Some(outcome);
            }
            NodeId::Synthesize => {
                let input = SynthesisInput {
                    question: state.question.clone(),
                    format_hint: state.format_hint.clone(),
                    context: state.retrieved_context().to_vec(),
                    constraints: state.constraints.clone(),
                    sql: state.sql_evidence(),
                    feedback: repair_signal(state, RepairTarget::Synth),
                };
                let draft = self
                    .steps
                    .synthesizer
                    .invoke(input)
                    .await
                    .map_err(step_failure)?;
                state.draft = Some(draft);
            }
            NodeId::Repair => {
                state
                    .apply_repair(self.limits.max_repairs)
                    .map_err(NodeFailure::fatal)?;
                tracing::info!(
                    repair_target = ?state.repair_target,
                    repair_count = state.repair_count(),
                    "applied repair"
                );
            }
        }
        Ok(())
    }

    async fn execute_query(&self, query: String) -> Result<SqlOutcome, NodeFailure> {
        let timeout = Duration::from_secs(self.settings.sql_timeout_secs);
        let result = self
            .with_gateway(move |g| {
                let rows = g.execute(&query, timeout)?;
                let schema = g.describe_schema()?;
                Ok::<_, GatewayError>((rows, tables_touched(&query, &schema)))
            })
            .await?;

        match result {
            Ok((rows, tables)) => Ok(SqlOutcome::Success {
                columns: rows.columns,
                rows: rows.rows,
                tables,
            }),
            Err(GatewayError::Query(failure)) => Ok(SqlOutcome::Failure { failure }),
            Err(e) => Err(gateway_failure(e)),
        }
    }

    /// Run blocking gateway work off the async workers.
    async fn with_gateway<T, F>(&self, f: F) -> Result<T, NodeFailure>
    where
        F: FnOnce(&dyn StructuredStoreGateway) -> T + Send + 'static,
        T: Send + 'static,
    {
        let gateway = Arc::clone(&self.gateway);
        tokio::task::spawn_blocking(move || f(gateway.as_ref()))
            .await
            .map_err(|e| NodeFailure::fatal(format!("gateway task failed: {}", e)))
    }
}

fn gateway_failure(error: GatewayError) -> NodeFailure {
    match error {
        GatewayError::Unavailable(_) => NodeFailure::fatal(error.to_string()),
        GatewayError::Query(_) => NodeFailure::recoverable(error.to_string()),
    }
}

/// The last failure, when the pending repair targets `target`.
fn repair_signal(state: &RunState, target: RepairTarget) -> Option<String> {
    if state.repair_target == target {
        state.last_failure.clone()
    } else {
        None
    }
}
