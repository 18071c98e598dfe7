//! Batch Models
//!
//! One line of the JSONL input and one line of the JSONL output.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Placeholder written to `sql` when no query was executed.
pub const NO_SQL: &str = "N/A";

/// Question identifier as written in the input: a string or a number.
/// Echoed back unchanged in the output record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuestionId {
    Text(String),
    Number(serde_json::Number),
}

impl QuestionId {
    /// Id from an arbitrary JSON value; other JSON types are not ids.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Number(n) => Some(Self::Number(n.clone())),
            _ => None,
        }
    }
}

impl std::fmt::Display for QuestionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuestionId::Text(s) => f.write_str(s),
            QuestionId::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<String> for QuestionId {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for QuestionId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl PartialEq<&str> for QuestionId {
    fn eq(&self, other: &&str) -> bool {
        matches!(self, QuestionId::Text(s) if s.as_str() == *other)
    }
}

/// A question read from the batch file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchQuestion {
    pub id: QuestionId,
    pub question: String,
    /// Expected answer shape, e.g. `int`, `float`, `{category:str, quantity:int}`
    #[serde(default)]
    pub format_hint: String,
}

/// The result record written for every input question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub id: QuestionId,
    pub final_answer: Value,
    /// Executed query, or `"N/A"`
    pub sql: String,
    /// Always within [0, 1]
    pub confidence: f64,
    pub explanation: String,
    pub citations: Vec<String>,
}

impl OutputRecord {
    /// Record for a question that never reached the graph (unparseable input line).
    pub fn rejected(id: impl Into<QuestionId>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            final_answer: Value::Null,
            sql: NO_SQL.to_string(),
            confidence: 0.0,
            explanation: reason.into(),
            citations: Vec::new(),
        }
    }
}
