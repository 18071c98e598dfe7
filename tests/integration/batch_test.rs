//! Batch Runner Integration Tests
//!
//! JSONL in, JSONL out, with the keyword router and scripted model steps:
//! - one output record per non-blank input line, in input order
//! - unparseable lines become failed records instead of aborting the batch
//! - cancellation fails the remaining questions

use serde_json::json;

use retail_copilot::models::batch::{OutputRecord, NO_SQL};
use retail_copilot::services::batch::{parse_batch, BatchRunner};
use retail_copilot::services::steps::KeywordRouter;
use retail_copilot::AppError;
use retail_copilot_core::{Constraints, RouteInput, SqlEvidence, SqlGenInput, SynthesisInput};

use crate::support::{citing_everything, fixed_plan, rows, ScriptedGateway, Steps, StubStep};

// ============================================================================
// Helpers
// ============================================================================

const QUESTIONS: &str = r#"{"id": "rag_policy_beverages_return_days", "question": "According to the product policy, what is the return window (days) for unopened Beverages?", "format_hint": "int"}
{"id": "sql_top3_products_by_revenue_alltime", "question": "Top 3 products by total revenue all-time.", "format_hint": "list[{product:str, revenue:float}]"}

{"id": "broken", "question": null}
{"id": "hybrid_revenue_beverages_summer_1997", "question": "Total revenue from the Beverages category during 'Summer Beverages 1997' dates.", "format_hint": "float"}
"#;

fn steps() -> Steps {
    Steps {
        router: StubStep::new("router", |input: &RouteInput, _| Ok(KeywordRouter::classify(&input.question))),
        planner: fixed_plan(Constraints::new()),
        sql_generator: StubStep::new("sql_generator", |input: &SqlGenInput, _| {
            Ok(if input.question.contains("Top 3") {
                "SELECT p.ProductName AS product, SUM(d.UnitPrice * d.Quantity) AS revenue FROM \"Order Details\" d JOIN Products p ON p.ProductID = d.ProductID GROUP BY p.ProductName ORDER BY revenue DESC LIMIT 3"
            } else {
                "SELECT SUM(d.UnitPrice * d.Quantity * (1 - d.Discount)) AS revenue FROM \"Order Details\" d JOIN Orders o ON o.OrderID = d.OrderID WHERE o.OrderDate BETWEEN '1997-06-01' AND '1997-06-30'"
            }
            .to_string())
        }),
        synthesizer: StubStep::new("synthesizer", |input: &SynthesisInput, _| {
            let answer = match &input.sql {
                Some(SqlEvidence::Rows { rows, .. }) => rows[0][0].clone(),
                _ => json!(14),
            };
            Ok(citing_everything(input, answer, 0.8))
        }),
    }
}

/// Every query gets the same one-cell result.
fn gateway() -> std::sync::Arc<ScriptedGateway> {
    ScriptedGateway::new(vec![Ok(rows(&["revenue"], vec![vec![json!(1210.5)]]))])
}

fn read_records(path: &std::path::Path) -> Vec<OutputRecord> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_run_file_preserves_order() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("questions.jsonl");
    let output = dir.path().join("out").join("outputs.jsonl");
    std::fs::write(&input, QUESTIONS).unwrap();

    let runner = BatchRunner::new(steps().executor(gateway()), 3);
    let summary = runner.run_file(&input, &output).await.unwrap();

    let records = read_records(&output);
    let ids: Vec<String> = records.iter().map(|r| r.id.to_string()).collect();
    assert_eq!(
        ids,
        vec![
            "rag_policy_beverages_return_days",
            "sql_top3_products_by_revenue_alltime",
            "broken",
            "hybrid_revenue_beverages_summer_1997",
        ]
    );
    assert_eq!(summary.total, 4);
    assert_eq!(summary.answered, 2);
    assert_eq!(summary.failed, 2);

    let rag = &records[0];
    assert_eq!(rag.final_answer, json!(14));
    assert_eq!(rag.sql, NO_SQL);

    // a scalar does not fit the list hint, even after one synthesizer repair
    let ranking = &records[1];
    assert!(ranking.final_answer.is_null());
    assert!(ranking.sql.contains("LIMIT 3"));
    assert!(ranking.explanation.contains("final_answer"));

    let broken = &records[2];
    assert!(broken.final_answer.is_null());
    assert_eq!(broken.confidence, 0.0);
    assert!(broken.explanation.starts_with("invalid input line 4"));

    let hybrid = &records[3];
    assert_eq!(hybrid.final_answer, json!(1210.5));
    assert!(hybrid.sql.starts_with("SELECT SUM("));
    assert!(hybrid.citations.contains(&"Order Details".to_string()));

    for record in &records {
        assert!((0.0..=1.0).contains(&record.confidence));
    }
}

#[tokio::test]
async fn test_cancelled_batch_still_writes_every_record() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("questions.jsonl");
    let output = dir.path().join("outputs.jsonl");
    std::fs::write(&input, QUESTIONS).unwrap();

    let runner = BatchRunner::new(steps().executor(gateway()), 2);
    runner.cancellation_token().cancel();
    let summary = runner.run_file(&input, &output).await.unwrap();

    assert_eq!(summary.total, 4);
    assert_eq!(summary.failed, 4);
    let records = read_records(&output);
    assert_eq!(records[0].explanation, "run cancelled");
    assert!(records.iter().all(|r| r.final_answer.is_null()));
}

#[tokio::test]
async fn test_numeric_id_echoed_back() {
    let lines = parse_batch(
        r#"{"id": 7, "question": "Total revenue from the Beverages category during 'Summer Beverages 1997' dates.", "format_hint": "float"}"#,
    );
    let runner = BatchRunner::new(steps().executor(gateway()), 1);
    let records = runner.run(lines).await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].final_answer, json!(1210.5));
    let written = serde_json::to_value(&records[0]).unwrap();
    assert_eq!(written["id"], json!(7));
}

#[tokio::test]
async fn test_missing_input_file() {
    let dir = tempfile::tempdir().unwrap();
    let runner = BatchRunner::new(steps().executor(gateway()), 1);
    let err = runner
        .run_file(&dir.path().join("none.jsonl"), &dir.path().join("out.jsonl"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
