//! Shared fixtures: scripted step modules, a scripted gateway and a small
//! document corpus. No model server is needed.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use retail_copilot::models::settings::GraphSettings;
use retail_copilot::services::graph::{GraphExecutor, StepSet};
use retail_copilot::services::knowledge::{Bm25Index, Document, ParagraphChunker};
use retail_copilot::storage::{GatewayError, QueryRows, StructuredStoreGateway};
use retail_copilot_core::{
    ColumnSchema, Constraints, DynStep, PlanInput, Route, RouteInput, Schema, SqlEvidence,
    SqlGenInput, StepModule, StepResult, SynthesisInput, SynthesisOutput, TableSchema,
};

// ============================================================================
// Scripted steps
// ============================================================================

type Respond<I, O> = Box<dyn Fn(&I, usize) -> StepResult<O> + Send + Sync>;

/// Step whose reply is computed from the input and the 0-based call number.
/// Every input is recorded.
pub struct StubStep<I, O> {
    name: &'static str,
    respond: Respond<I, O>,
    inputs: Mutex<Vec<I>>,
}

impl<I: Clone + 'static, O: 'static> StubStep<I, O> {
    pub fn new(
        name: &'static str,
        respond: impl Fn(&I, usize) -> StepResult<O> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            respond: Box::new(respond),
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.inputs.lock().unwrap().len()
    }

    pub fn input(&self, call: usize) -> I {
        self.inputs.lock().unwrap()[call].clone()
    }
}

#[async_trait]
impl<I, O> StepModule for StubStep<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &'static str {
        self.name
    }

    async fn invoke(&self, input: I) -> StepResult<O> {
        let call = {
            let mut inputs = self.inputs.lock().unwrap();
            inputs.push(input.clone());
            inputs.len() - 1
        };
        (self.respond)(&input, call)
    }
}

pub fn fixed_route(route: Route) -> Arc<StubStep<RouteInput, Route>> {
    StubStep::new("router", move |_, _| Ok(route))
}

pub fn fixed_plan(constraints: Constraints) -> Arc<StubStep<PlanInput, Constraints>> {
    StubStep::new("planner", move |_, _| Ok(constraints.clone()))
}

/// Draft that cites every retrieved chunk and every table the query touched.
pub fn citing_everything(input: &SynthesisInput, answer: Value, confidence: f64) -> SynthesisOutput {
    let mut citations: Vec<String> = input.context.iter().map(|c| c.chunk_id.clone()).collect();
    if let Some(SqlEvidence::Rows { tables, .. }) = &input.sql {
        citations.extend(tables.iter().cloned());
    }
    SynthesisOutput {
        final_answer: answer,
        explanation: "Answered from the gathered evidence.".to_string(),
        confidence,
        citations,
    }
}

// ============================================================================
// Scripted gateway
// ============================================================================

/// Gateway that replays scripted results; once the script runs out it
/// repeats the last entry.
pub struct ScriptedGateway {
    schema: Schema,
    results: Mutex<VecDeque<Result<QueryRows, GatewayError>>>,
    last: Mutex<Option<Result<QueryRows, GatewayError>>>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn new(results: Vec<Result<QueryRows, GatewayError>>) -> Arc<Self> {
        Arc::new(Self {
            schema: northwind_schema(),
            results: Mutex::new(results.into()),
            last: Mutex::new(None),
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl StructuredStoreGateway for ScriptedGateway {
    fn describe_schema(&self) -> Result<Schema, GatewayError> {
        Ok(self.schema.clone())
    }

    fn execute(&self, query: &str, _timeout: Duration) -> Result<QueryRows, GatewayError> {
        self.queries.lock().unwrap().push(query.to_string());
        let mut last = self.last.lock().unwrap();
        match self.results.lock().unwrap().pop_front() {
            Some(result) => {
                *last = Some(result.clone());
                result
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(GatewayError::Unavailable("no scripted result".to_string()))),
        }
    }
}

pub fn rows(columns: &[&str], rows: Vec<Vec<Value>>) -> QueryRows {
    QueryRows {
        columns: columns.iter().map(|c| c.to_string()).collect(),
        rows,
    }
}

fn table(name: &str, columns: &[&str]) -> TableSchema {
    TableSchema {
        name: name.to_string(),
        columns: columns
            .iter()
            .map(|c| ColumnSchema {
                name: c.to_string(),
                decl_type: String::new(),
            })
            .collect(),
    }
}

pub fn northwind_schema() -> Schema {
    Schema {
        tables: vec![
            table("Categories", &["CategoryID", "CategoryName"]),
            table("Customers", &["CustomerID", "CompanyName"]),
            table("Order Details", &["OrderID", "ProductID", "UnitPrice", "Quantity", "Discount"]),
            table("Orders", &["OrderID", "CustomerID", "OrderDate"]),
            table("Products", &["ProductID", "ProductName", "CategoryID"]),
        ],
    }
}

// ============================================================================
// Corpus and executor
// ============================================================================

pub fn corpus() -> Arc<Bm25Index> {
    let documents = vec![
        Document::new(
            "marketing_calendar",
            "# Northwind Marketing Calendar (1997)\n\n## Summer Beverages 1997\n- Dates: 1997-06-01 to 1997-06-30\n- Notes: Focus on Beverages and Condiments.\n\n## Winter Classics 1997\n- Dates: 1997-12-01 to 1997-12-31\n- Notes: Push Dairy Products and Confections for holiday gifting.",
        ),
        Document::new(
            "kpi_definitions",
            "# KPI Definitions\n\n## Average Order Value (AOV)\n- AOV = SUM(UnitPrice * Quantity * (1 - Discount)) / COUNT(DISTINCT OrderID)\n\n## Gross Margin\n- GM = SUM((UnitPrice - CostOfGoods) * Quantity * (1 - Discount))",
        ),
        Document::new(
            "product_policy",
            "# Returns & Policy\n\n- Perishables (Produce, Seafood, Dairy): 3-7 days.\n- Beverages unopened: 14 days; opened: no returns.\n- Non-perishables: 30 days.",
        ),
    ];
    Arc::new(Bm25Index::from_documents(&documents, &ParagraphChunker))
}

/// The four step modules of one run, kept as concrete stubs so tests can
/// inspect their recorded inputs.
pub struct Steps {
    pub router: Arc<StubStep<RouteInput, Route>>,
    pub planner: Arc<StubStep<PlanInput, Constraints>>,
    pub sql_generator: Arc<StubStep<SqlGenInput, String>>,
    pub synthesizer: Arc<StubStep<SynthesisInput, SynthesisOutput>>,
}

impl Steps {
    pub fn step_set(&self) -> StepSet {
        StepSet {
            router: self.router.clone() as DynStep<RouteInput, Route>,
            planner: self.planner.clone() as DynStep<PlanInput, Constraints>,
            sql_generator: self.sql_generator.clone() as DynStep<SqlGenInput, String>,
            synthesizer: self.synthesizer.clone() as DynStep<SynthesisInput, SynthesisOutput>,
        }
    }

    pub fn executor(&self, gateway: Arc<dyn StructuredStoreGateway>) -> GraphExecutor {
        GraphExecutor::new(self.step_set(), corpus(), gateway, GraphSettings::default())
    }
}
