//! Graph Executor Integration Tests
//!
//! End-to-end runs of the question graph with scripted step modules and a
//! scripted structured store:
//! - document-only answers that never touch SQL
//! - SQL repair after a failing query
//! - synthesizer repair after an invalid draft
//! - repair budget exhaustion
//! - fatal step failures and determinism

use serde_json::json;
use tokio_util::sync::CancellationToken;

use retail_copilot::models::batch::NO_SQL;
use retail_copilot::services::graph::{NodeId, RunStatus};
use retail_copilot::services::output::format_record;
use retail_copilot::storage::{GatewayError, QueryFailure};
use retail_copilot_core::{ConstraintKey, Constraints, Route, StepError};

use crate::support::{
    citing_everything, fixed_plan, fixed_route, rows, ScriptedGateway, Steps, StubStep,
};

// ============================================================================
// Helpers
// ============================================================================

fn winter_classics() -> Constraints {
    let mut constraints = Constraints::new();
    constraints
        .insert(ConstraintKey::StartDate, json!("1997-12-01"))
        .unwrap();
    constraints
        .insert(ConstraintKey::EndDate, json!("1997-12-31"))
        .unwrap();
    constraints
        .insert(ConstraintKey::Kpi, json!("average_order_value"))
        .unwrap();
    constraints
}

fn unused_sql() -> std::sync::Arc<StubStep<retail_copilot_core::SqlGenInput, String>> {
    StubStep::new("sql_generator", |_, _| {
        Err(StepError::contract("sql_generator", "not expected in this run"))
    })
}

const AOV_BAD: &str = "SELECT SUM(d.UnitPrice * d.Quantity) / COUNT(DISTINCT o.OrderID) AS Revnue FROM Orders o JOIN \"Order Details\" d ON d.OrderID = o.OrderID WHERE o.OrderDate BETWEEN '1997-12-01' AND '1997-12-31' GROUP BY Revnue2";
const AOV_GOOD: &str = "SELECT ROUND(SUM(d.UnitPrice * d.Quantity * (1 - d.Discount)) / COUNT(DISTINCT o.OrderID), 2) AS AOV FROM Orders o JOIN \"Order Details\" d ON d.OrderID = o.OrderID WHERE o.OrderDate BETWEEN '1997-12-01' AND '1997-12-31'";

fn rag_steps(synthesizer: std::sync::Arc<StubStep<retail_copilot_core::SynthesisInput, retail_copilot_core::SynthesisOutput>>) -> Steps {
    Steps {
        router: fixed_route(Route::Rag),
        planner: fixed_plan(Constraints::new()),
        sql_generator: unused_sql(),
        synthesizer,
    }
}

// ============================================================================
// Document-only questions
// ============================================================================

#[tokio::test]
async fn test_rag_question_answers_without_sql() {
    let steps = rag_steps(StubStep::new("synthesizer", |input, _| {
        Ok(citing_everything(input, json!(14), 0.9))
    }));
    let gateway = ScriptedGateway::new(vec![]);
    let executor = steps.executor(gateway.clone());

    let state = executor
        .run(
            "rag_policy_beverages_return_days",
            "According to the product policy, what is the return window (days) for unopened Beverages?",
            "int",
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(state.status(), RunStatus::Done);
    assert_eq!(state.route(), Some(Route::Rag));
    assert_eq!(state.repair_count(), 0);
    assert_eq!(
        state.trace,
        vec![NodeId::Retrieve, NodeId::Route, NodeId::Synthesize]
    );
    assert_eq!(steps.planner.calls(), 0);
    assert_eq!(steps.sql_generator.calls(), 0);
    assert!(gateway.queries().is_empty());

    let synth_input = steps.synthesizer.input(0);
    assert!(synth_input.sql.is_none());
    assert!(synth_input.feedback.is_none());
    assert!(synth_input
        .context
        .iter()
        .any(|c| c.chunk_id == "product_policy::chunk1"));

    let record = format_record(&state);
    assert_eq!(record.final_answer, json!(14));
    assert_eq!(record.sql, NO_SQL);
    assert!(!record.citations.is_empty());
    assert!(record.citations.iter().all(|c| c.contains("::chunk")));
}

// ============================================================================
// SQL repair
// ============================================================================

#[tokio::test]
async fn test_failed_query_is_repaired_once() {
    let steps = Steps {
        router: fixed_route(Route::Hybrid),
        planner: fixed_plan(winter_classics()),
        sql_generator: StubStep::new("sql_generator", |_, call| {
            Ok(if call == 0 { AOV_BAD } else { AOV_GOOD }.to_string())
        }),
        synthesizer: StubStep::new("synthesizer", |input, _| {
            Ok(citing_everything(input, json!(1487.31), 0.8))
        }),
    };
    let gateway = ScriptedGateway::new(vec![
        Err(GatewayError::Query(QueryFailure::Syntax {
            message: "no such column: Revnue2".to_string(),
        })),
        Ok(rows(&["AOV"], vec![vec![json!(1487.31)]])),
    ]);
    let executor = steps.executor(gateway.clone());

    let state = executor
        .run(
            "hybrid_aov_winter_1997",
            "Using the AOV definition from the KPI docs, what was the Average Order Value during 'Winter Classics 1997'?",
            "float",
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(state.status(), RunStatus::Done, "{}", state.explanation);
    assert_eq!(state.repair_count(), 1);
    assert_eq!(state.route(), Some(Route::Hybrid));
    assert_eq!(
        state.trace.iter().filter(|n| **n == NodeId::Repair).count(),
        1
    );
    assert_eq!(gateway.queries(), vec![AOV_BAD.to_string(), AOV_GOOD.to_string()]);

    // the regeneration sees the failed query and why it failed
    assert_eq!(steps.sql_generator.calls(), 2);
    let first = steps.sql_generator.input(0);
    assert!(first.previous_query.is_none());
    assert!(first.failure_reason.is_none());
    let retry = steps.sql_generator.input(1);
    assert_eq!(retry.previous_query.as_deref(), Some(AOV_BAD));
    assert!(retry
        .failure_reason
        .as_deref()
        .is_some_and(|r| r.contains("no such column: Revnue2")));
    assert_eq!(retry.constraints, winter_classics());

    // repair leaves route, constraints and retrieved context alone
    let before = steps.synthesizer.input(0);
    let after = steps.synthesizer.input(1);
    assert_eq!(before.context, after.context);
    assert_eq!(after.constraints, winter_classics());
    assert!(after.feedback.is_none());
    assert_eq!(steps.planner.calls(), 1);
    assert_eq!(steps.router.calls(), 1);

    let record = format_record(&state);
    assert_eq!(record.sql, AOV_GOOD);
    assert_eq!(record.final_answer, json!(1487.31));
    assert!(record.citations.contains(&"Orders".to_string()));
    assert!(record.citations.contains(&"Order Details".to_string()));
}

#[tokio::test]
async fn test_generator_contract_violation_is_repaired() {
    let steps = Steps {
        router: fixed_route(Route::Sql),
        planner: fixed_plan(Constraints::new()),
        sql_generator: StubStep::new("sql_generator", |_, call| {
            if call == 0 {
                Err(StepError::contract("sql_generator", "unknown table(s): Sales"))
            } else {
                Ok("SELECT ProductName FROM Products LIMIT 3".to_string())
            }
        }),
        synthesizer: StubStep::new("synthesizer", |input, _| {
            Ok(citing_everything(input, json!(["Chai", "Chang", "Aniseed Syrup"]), 0.7))
        }),
    };
    let gateway = ScriptedGateway::new(vec![Ok(rows(
        &["ProductName"],
        vec![vec![json!("Chai")], vec![json!("Chang")], vec![json!("Aniseed Syrup")]],
    ))]);
    let executor = steps.executor(gateway.clone());

    let state = executor
        .run("sql_products", "List three products.", "list[str]", &CancellationToken::new())
        .await;

    assert_eq!(state.status(), RunStatus::Done, "{}", state.explanation);
    assert_eq!(
        state.trace,
        vec![
            NodeId::Retrieve,
            NodeId::Route,
            NodeId::Plan,
            NodeId::GenerateSql,
            NodeId::Repair,
            NodeId::GenerateSql,
            NodeId::ExecuteSql,
            NodeId::Synthesize,
        ]
    );
    let retry = steps.sql_generator.input(1);
    assert!(retry.previous_query.is_none());
    assert!(retry
        .failure_reason
        .as_deref()
        .is_some_and(|r| r.contains("unknown table(s): Sales")));
    assert_eq!(gateway.queries().len(), 1);
}

#[tokio::test]
async fn test_persistent_sql_failure_exhausts_budget() {
    let steps = Steps {
        router: fixed_route(Route::Sql),
        planner: fixed_plan(Constraints::new()),
        sql_generator: StubStep::new("sql_generator", |_, call| {
            Ok(format!(
                "SELECT CustomerID FROM Orders WHERE OrderDate LIKE '2031-%' LIMIT {}",
                call + 1
            ))
        }),
        synthesizer: StubStep::new("synthesizer", |input, _| {
            Ok(citing_everything(input, json!(null), 0.1))
        }),
    };
    let gateway = ScriptedGateway::new(vec![Err(GatewayError::Query(QueryFailure::Empty))]);
    let executor = steps.executor(gateway.clone());

    let state = executor
        .run(
            "sql_top_customer_2031",
            "Top customer by gross margin in 2031?",
            "{customer:str, margin:float}",
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(state.status(), RunStatus::Failed);
    assert_eq!(state.repair_count(), 2);
    assert_eq!(steps.sql_generator.calls(), 3);
    assert_eq!(gateway.queries().len(), 3);
    assert!(state.final_answer.is_none());
    assert!(state.trace.len() <= 6 + 4 * 2);

    let record = format_record(&state);
    assert_eq!(record.final_answer, json!(null));
    assert_eq!(record.confidence, 0.0);
    assert!(record.citations.is_empty());
    assert_eq!(
        record.sql,
        "SELECT CustomerID FROM Orders WHERE OrderDate LIKE '2031-%' LIMIT 3"
    );
    assert!(record.explanation.contains("repair budget exhausted after 2 repair(s)"));
    assert!(record.explanation.contains("query returned no rows"));
}

// ============================================================================
// Synthesizer repair
// ============================================================================

#[tokio::test]
async fn test_invalid_draft_is_repaired() {
    let steps = rag_steps(StubStep::new("synthesizer", |input, call| {
        let confidence = if call == 0 { 1.5 } else { 0.9 };
        Ok(citing_everything(input, json!(14), confidence))
    }));
    let executor = steps.executor(ScriptedGateway::new(vec![]));

    let state = executor
        .run(
            "rag_policy_beverages_return_days",
            "What is the return window (days) for unopened Beverages?",
            "int",
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(state.status(), RunStatus::Done, "{}", state.explanation);
    assert_eq!(state.repair_count(), 1);
    assert_eq!(
        state.trace,
        vec![
            NodeId::Retrieve,
            NodeId::Route,
            NodeId::Synthesize,
            NodeId::Repair,
            NodeId::Synthesize,
        ]
    );
    let feedback = steps.synthesizer.input(1).feedback.unwrap_or_default();
    assert!(feedback.contains("confidence 1.5 is outside [0, 1]"), "{}", feedback);
    assert_eq!(format_record(&state).confidence, 0.9);
}

#[tokio::test]
async fn test_second_invalid_draft_fails_the_run() {
    let steps = rag_steps(StubStep::new("synthesizer", |input, _| {
        Ok(citing_everything(input, json!("two weeks"), 0.6))
    }));
    let executor = steps.executor(ScriptedGateway::new(vec![]));

    let state = executor
        .run(
            "rag_policy_beverages_return_days",
            "What is the return window (days) for unopened Beverages?",
            "int",
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(state.status(), RunStatus::Failed);
    assert_eq!(state.repair_count(), 1);
    assert_eq!(steps.synthesizer.calls(), 2);
    assert!(state.final_answer.is_none());
    assert!(state
        .explanation
        .starts_with("repair budget exhausted after 1 repair(s)"));
}

#[tokio::test]
async fn test_uncited_draft_is_rejected() {
    let steps = rag_steps(StubStep::new("synthesizer", |_, _| {
        Ok(retail_copilot_core::SynthesisOutput {
            final_answer: json!(14),
            explanation: "From memory.".to_string(),
            confidence: 0.9,
            citations: vec!["made_up::chunk9".to_string()],
        })
    }));
    let executor = steps.executor(ScriptedGateway::new(vec![]));

    let state = executor
        .run("q", "What is the return window for unopened Beverages?", "int", &CancellationToken::new())
        .await;

    assert_eq!(state.status(), RunStatus::Failed);
    assert!(state.explanation.contains("made_up::chunk9"));
}

// ============================================================================
// Fatal failures
// ============================================================================

#[tokio::test]
async fn test_router_violation_is_terminal() {
    let steps = Steps {
        router: StubStep::new("router", |_, _| {
            Err(StepError::contract("router", "expected rag, sql or hybrid, got \"maybe\""))
        }),
        planner: fixed_plan(Constraints::new()),
        sql_generator: unused_sql(),
        synthesizer: StubStep::new("synthesizer", |input, _| {
            Ok(citing_everything(input, json!(1), 1.0))
        }),
    };
    let executor = steps.executor(ScriptedGateway::new(vec![]));

    let state = executor
        .run("q", "Anything?", "int", &CancellationToken::new())
        .await;

    assert_eq!(state.status(), RunStatus::Failed);
    assert_eq!(state.trace, vec![NodeId::Retrieve, NodeId::Route]);
    assert_eq!(state.repair_count(), 0);
    assert!(state.route().is_none());
    assert!(state.explanation.contains("router: contract violation"));

    let record = format_record(&state);
    assert_eq!(record.sql, NO_SQL);
}

#[tokio::test]
async fn test_unavailable_backend_is_not_repaired() {
    let steps = rag_steps(StubStep::new("synthesizer", |_, _| {
        Err(StepError::unavailable("synthesizer", "connection refused"))
    }));
    let executor = steps.executor(ScriptedGateway::new(vec![]));

    let state = executor
        .run("q", "What is the return window?", "int", &CancellationToken::new())
        .await;

    assert_eq!(state.status(), RunStatus::Failed);
    assert_eq!(state.repair_count(), 0);
    assert_eq!(steps.synthesizer.calls(), 1);
    assert!(state.explanation.contains("connection refused"));
}

// ============================================================================
// Determinism
// ============================================================================

#[tokio::test]
async fn test_same_inputs_give_same_record() {
    let run = || async {
        let steps = Steps {
            router: fixed_route(Route::Hybrid),
            planner: fixed_plan(winter_classics()),
            sql_generator: StubStep::new("sql_generator", |_, _| Ok(AOV_GOOD.to_string())),
            synthesizer: StubStep::new("synthesizer", |input, _| {
                Ok(citing_everything(input, json!(1487.31), 0.8))
            }),
        };
        let gateway = ScriptedGateway::new(vec![Ok(rows(&["AOV"], vec![vec![json!(1487.31)]]))]);
        let state = steps
            .executor(gateway)
            .run(
                "hybrid_aov_winter_1997",
                "What was the AOV during Winter Classics 1997?",
                "float",
                &CancellationToken::new(),
            )
            .await;
        (state.run_id.clone(), format_record(&state))
    };

    let (first_id, first) = run().await;
    let (second_id, second) = run().await;
    assert_eq!(first, second);
    assert_ne!(first_id, second_id);
}
