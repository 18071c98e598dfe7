//! Structured Store Integration Tests
//!
//! Runs the graph against a real SQLite file built in a temp directory:
//! - successful SQL answers cite the tables they touched
//! - mutating statements are refused and repaired, never executed

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use retail_copilot::services::graph::{NodeId, RunStatus};
use retail_copilot::services::output::format_record;
use retail_copilot::storage::{GatewayError, QueryFailure, SqliteGateway, StructuredStoreGateway};
use retail_copilot_core::{Constraints, Route};

use crate::support::{citing_everything, fixed_plan, fixed_route, Steps, StubStep};

// ============================================================================
// Helpers
// ============================================================================

fn northwind_fixture() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("northwind.sqlite");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        r#"
        CREATE TABLE Categories (CategoryID INTEGER PRIMARY KEY, CategoryName TEXT);
        CREATE TABLE Products (ProductID INTEGER PRIMARY KEY, ProductName TEXT, CategoryID INTEGER);
        CREATE TABLE Orders (OrderID INTEGER PRIMARY KEY, CustomerID TEXT, OrderDate TEXT);
        CREATE TABLE "Order Details" (OrderID INTEGER, ProductID INTEGER, UnitPrice REAL, Quantity INTEGER, Discount REAL);
        INSERT INTO Categories VALUES (1, 'Beverages'), (2, 'Condiments');
        INSERT INTO Products VALUES (1, 'Chai', 1), (2, 'Chang', 1), (3, 'Aniseed Syrup', 2);
        INSERT INTO Orders VALUES (10, 'ALFKI', '1997-06-03'), (11, 'BONAP', '1997-06-17'), (12, 'ALFKI', '1997-12-05');
        INSERT INTO "Order Details" VALUES
            (10, 1, 18.0, 10, 0.0),
            (10, 3, 10.0, 5, 0.0),
            (11, 2, 19.0, 20, 0.1),
            (12, 3, 10.0, 7, 0.0);
        "#,
    )
    .unwrap();
    (dir, path)
}

const CATEGORY_QUERY: &str = r#"SELECT c.CategoryName AS category, SUM(d.Quantity) AS quantity
FROM "Order Details" d
JOIN Orders o ON o.OrderID = d.OrderID
JOIN Products p ON p.ProductID = d.ProductID
JOIN Categories c ON c.CategoryID = p.CategoryID
WHERE o.OrderDate BETWEEN '1997-06-01' AND '1997-06-30'
GROUP BY c.CategoryName
ORDER BY quantity DESC
LIMIT 1"#;

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_hybrid_question_over_sqlite() {
    let (_dir, path) = northwind_fixture();
    let gateway = Arc::new(SqliteGateway::open(&path, 2).unwrap());

    let steps = Steps {
        router: fixed_route(Route::Hybrid),
        planner: fixed_plan(Constraints::new()),
        sql_generator: StubStep::new("sql_generator", |_, _| Ok(CATEGORY_QUERY.to_string())),
        synthesizer: StubStep::new("synthesizer", |input, _| {
            Ok(citing_everything(
                input,
                json!({"category": "Beverages", "quantity": 30.0}),
                0.85,
            ))
        }),
    };
    let executor = steps.executor(gateway);

    let state = executor
        .run(
            "hybrid_top_category_qty_summer_1997",
            "During 'Summer Beverages 1997', which product category had the highest total quantity sold?",
            "{category:str, quantity:int}",
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(state.status(), RunStatus::Done, "{}", state.explanation);

    // the synthesizer saw the real rows
    let evidence = steps.synthesizer.input(0).sql.unwrap();
    let retail_copilot_core::SqlEvidence::Rows { columns, rows, tables, .. } = evidence else {
        panic!("expected rows");
    };
    assert_eq!(columns, vec!["category", "quantity"]);
    assert_eq!(rows, vec![vec![json!("Beverages"), json!(30)]]);
    assert_eq!(
        tables,
        vec!["Categories", "Order Details", "Orders", "Products"]
    );

    let record = format_record(&state);
    assert_eq!(record.sql, CATEGORY_QUERY);
    assert_eq!(record.final_answer, json!({"category": "Beverages", "quantity": 30}));
    assert!(record.citations.contains(&"Order Details".to_string()));
    assert!(record
        .citations
        .iter()
        .any(|c| c.starts_with("marketing_calendar::")));
}

#[tokio::test]
async fn test_mutation_is_refused_and_repaired() {
    let (_dir, path) = northwind_fixture();
    let gateway = Arc::new(SqliteGateway::open(&path, 2).unwrap());

    let steps = Steps {
        router: fixed_route(Route::Sql),
        planner: fixed_plan(Constraints::new()),
        sql_generator: StubStep::new("sql_generator", |_, call| {
            Ok(if call == 0 {
                "DELETE FROM Orders".to_string()
            } else {
                "SELECT COUNT(*) AS orders FROM Orders".to_string()
            })
        }),
        synthesizer: StubStep::new("synthesizer", |input, _| {
            Ok(citing_everything(input, json!(3), 0.9))
        }),
    };
    let executor = steps.executor(gateway.clone());

    let state = executor
        .run("sql_order_count", "How many orders are there?", "int", &CancellationToken::new())
        .await;

    assert_eq!(state.status(), RunStatus::Done, "{}", state.explanation);
    assert_eq!(state.repair_count(), 1);
    assert!(state.trace.contains(&NodeId::Repair));
    let retry = steps.sql_generator.input(1);
    assert_eq!(retry.previous_query.as_deref(), Some("DELETE FROM Orders"));
    assert!(retry
        .failure_reason
        .as_deref()
        .is_some_and(|r| r.starts_with("query rejected")));

    // nothing was deleted
    let count = gateway
        .execute("SELECT COUNT(*) FROM Orders", Duration::from_secs(5))
        .unwrap();
    assert_eq!(count.rows, vec![vec![json!(3)]]);
}

#[test]
fn test_gateway_rejects_multiple_statements() {
    let (_dir, path) = northwind_fixture();
    let gateway = SqliteGateway::open(&path, 1).unwrap();
    let err = gateway
        .execute("SELECT 1; DROP TABLE Orders", Duration::from_secs(5))
        .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Query(QueryFailure::MutationRejected { .. })
    ));

    let schema = gateway.describe_schema().unwrap();
    assert!(schema.find_table("Orders").is_some());
    assert!(schema.find_table("order_items").is_some());
}
