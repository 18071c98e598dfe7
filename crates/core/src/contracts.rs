//! Step Contracts
//!
//! Typed inputs and outputs exchanged between graph nodes and step modules.
//! These types are the fixed schema each step must honor; step
//! implementations parse model output into them or fail with a contract
//! violation.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ContractError;

// ============================================================================
// Route
// ============================================================================

/// Question classification produced by the Router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    /// Answerable from documents alone.
    Rag,
    /// Answerable from the structured store alone.
    Sql,
    /// Needs document context to parameterize a structured query.
    Hybrid,
}

impl Route {
    /// Whether this route runs the SQL path (plan, generate_sql, execute_sql).
    pub fn uses_sql(&self) -> bool {
        !matches!(self, Route::Rag)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Rag => write!(f, "rag"),
            Route::Sql => write!(f, "sql"),
            Route::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl FromStr for Route {
    type Err = ContractError;

    /// Accepts exactly one of the three labels (case-insensitive, surrounding
    /// whitespace ignored). Anything else is an error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rag" => Ok(Route::Rag),
            "sql" => Ok(Route::Sql),
            "hybrid" => Ok(Route::Hybrid),
            other => Err(ContractError::UnknownRoute(other.to_string())),
        }
    }
}

// ============================================================================
// Retrieved context
// ============================================================================

/// One ranked passage returned by the document index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// Source document identifier (file stem).
    pub document_id: String,
    /// Stable citation identifier (`<document_id>::chunk<n>`).
    pub chunk_id: String,
    /// Chunk text.
    pub text: String,
    /// Ranking score (higher is more relevant).
    pub score: f64,
}

// ============================================================================
// Constraints
// ============================================================================

/// Plan parameters the Planner is allowed to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKey {
    /// Inclusive ISO start date (YYYY-MM-DD).
    StartDate,
    /// Inclusive ISO end date (YYYY-MM-DD).
    EndDate,
    /// Product category filter.
    Category,
    /// KPI formula identifier (e.g. "average_order_value", "gross_margin").
    Kpi,
    /// Documented approximation ratio, e.g. cost of goods as a fraction of unit price.
    CostRatio,
    /// Row limit for ranking questions.
    Limit,
}

impl ConstraintKey {
    /// All recognized keys, in canonical order.
    pub const ALL: [ConstraintKey; 6] = [
        ConstraintKey::StartDate,
        ConstraintKey::EndDate,
        ConstraintKey::Category,
        ConstraintKey::Kpi,
        ConstraintKey::CostRatio,
        ConstraintKey::Limit,
    ];

    /// Wire name of the key.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintKey::StartDate => "start_date",
            ConstraintKey::EndDate => "end_date",
            ConstraintKey::Category => "category",
            ConstraintKey::Kpi => "kpi",
            ConstraintKey::CostRatio => "cost_ratio",
            ConstraintKey::Limit => "limit",
        }
    }

    /// Whether `value` has the shape this key requires.
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ConstraintKey::StartDate | ConstraintKey::EndDate => {
                value.as_str().map(is_iso_date).unwrap_or(false)
            }
            ConstraintKey::Category | ConstraintKey::Kpi => {
                value.as_str().map(|s| !s.trim().is_empty()).unwrap_or(false)
            }
            ConstraintKey::CostRatio => value
                .as_f64()
                .map(|r| r > 0.0 && r <= 1.0)
                .unwrap_or(false),
            ConstraintKey::Limit => value.as_u64().map(|n| n > 0).unwrap_or(false),
        }
    }
}

impl FromStr for ConstraintKey {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConstraintKey::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| ContractError::UnknownConstraintKey(s.to_string()))
    }
}

fn is_iso_date(s: &str) -> bool {
    s.len() == 10 && NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// Extracted plan parameters. Only recognized keys with well-shaped values are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints(BTreeMap<ConstraintKey, Value>);

impl Constraints {
    /// Create an empty constraint set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build constraints from a raw JSON object.
    ///
    /// Returns the accepted constraints plus the names of dropped entries
    /// (unrecognized keys, nulls, and wrongly-shaped values).
    pub fn from_json_object(object: &serde_json::Map<String, Value>) -> (Self, Vec<String>) {
        let mut accepted = BTreeMap::new();
        let mut dropped = Vec::new();
        for (raw_key, value) in object {
            match raw_key.parse::<ConstraintKey>() {
                Ok(key) if key.accepts(value) => {
                    accepted.insert(key, value.clone());
                }
                _ => dropped.push(raw_key.clone()),
            }
        }
        (Self(accepted), dropped)
    }

    /// Insert a value, validating its shape.
    pub fn insert(&mut self, key: ConstraintKey, value: Value) -> Result<(), ContractError> {
        if !key.accepts(&value) {
            return Err(ContractError::InvalidConstraint {
                key: key.as_str(),
                value: value.to_string(),
            });
        }
        self.0.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: ConstraintKey) -> Option<&Value> {
        self.0.get(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConstraintKey, &Value)> {
        self.0.iter()
    }

    /// Render as a JSON object for prompts.
    pub fn to_json(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .0
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.clone()))
            .collect();
        Value::Object(map)
    }
}

// ============================================================================
// Schema
// ============================================================================

/// One column of a table in the structured store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    /// Declared SQL type (may be empty).
    pub decl_type: String,
}

/// One table (or view) of the structured store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

/// Schema metadata supplied to the SQL-Generator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub tables: Vec<TableSchema>,
}

impl Schema {
    /// Look up a table by name (SQLite identifiers are case-insensitive).
    pub fn find_table(&self, name: &str) -> Option<&TableSchema> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    /// Prompt-friendly rendering: one `Table:`/`Columns:` pair per table.
    pub fn render(&self) -> String {
        self.tables
            .iter()
            .map(|t| {
                let cols = t
                    .columns
                    .iter()
                    .map(|c| {
                        if c.decl_type.is_empty() {
                            c.name.clone()
                        } else {
                            format!("{} {}", c.name, c.decl_type)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("Table: {}\nColumns: {}", t.name, cols)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ============================================================================
// SQL evidence
// ============================================================================

/// What the Synthesizer is told about the structured-store leg of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SqlEvidence {
    /// Query ran and produced rows.
    Rows {
        query: String,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
        /// Schema tables referenced by the query; the only valid table citations.
        tables: Vec<String>,
    },
    /// Query failed or produced nothing usable.
    Failed { query: Option<String>, reason: String },
}

// ============================================================================
// Step inputs
// ============================================================================

/// Router input: the question plus a short preview of retrieved context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteInput {
    pub question: String,
    pub context_preview: String,
}

/// Planner input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanInput {
    pub question: String,
    pub context: Vec<RetrievedChunk>,
}

/// SQL-Generator input. `previous_query`/`failure_reason` carry the repair signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlGenInput {
    pub question: String,
    pub constraints: Constraints,
    pub schema: Schema,
    pub previous_query: Option<String>,
    pub failure_reason: Option<String>,
}

/// Synthesizer input. `feedback` carries the reason a previous draft was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisInput {
    pub question: String,
    pub format_hint: String,
    pub context: Vec<RetrievedChunk>,
    pub constraints: Constraints,
    pub sql: Option<SqlEvidence>,
    pub feedback: Option<String>,
}

// ============================================================================
// Synthesizer output
// ============================================================================

/// Draft answer produced by the Synthesizer. Checked against the output
/// contract before it may become the run's final answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisOutput {
    pub final_answer: Value,
    #[serde(default)]
    pub explanation: String,
    pub confidence: f64,
    #[serde(default)]
    pub citations: Vec<String>,
}
