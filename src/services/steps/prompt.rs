//! SQL Prompt Bundle
//!
//! Versioned instructions plus few-shot exemplars for the SQL-Generator.
//! Bundles are produced offline by prompt tuning and loaded once at startup;
//! the built-in default is used when none is configured.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::error::{AppError, AppResult};

/// One worked example: question and extracted constraints mapped to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlExemplar {
    pub question: String,
    #[serde(default)]
    pub constraints: Value,
    pub sql: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptBundle {
    pub version: String,
    pub instructions: String,
    #[serde(default)]
    pub exemplars: Vec<SqlExemplar>,
}

const DEFAULT_INSTRUCTIONS: &str = r#"You write a single SQLite SELECT query against the Northwind database.

Rules:
1. Use only the tables and columns listed in the schema
2. Quote table names that contain spaces, e.g. "Order Details"
3. Revenue is SUM(UnitPrice * Quantity * (1 - Discount)) over "Order Details"
4. Apply date constraints to Orders.OrderDate with BETWEEN 'start' AND 'end'
5. When no cost column exists, approximate CostOfGoods as cost_ratio * UnitPrice (default 0.7)
6. Return ONLY the SQL, no markdown fences, no commentary"#;

impl Default for PromptBundle {
    fn default() -> Self {
        Self {
            version: "builtin-1".to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            exemplars: vec![
                SqlExemplar {
                    question: "Top 3 products by total revenue all-time.".to_string(),
                    constraints: serde_json::json!({ "limit": 3 }),
                    sql: "SELECT p.ProductName, SUM(od.UnitPrice * od.Quantity * (1 - od.Discount)) AS revenue \
                          FROM \"Order Details\" od JOIN Products p ON p.ProductID = od.ProductID \
                          GROUP BY p.ProductName ORDER BY revenue DESC LIMIT 3"
                        .to_string(),
                },
                SqlExemplar {
                    question: "Average Order Value during Winter Classics 1997.".to_string(),
                    constraints: serde_json::json!({
                        "start_date": "1997-12-01",
                        "end_date": "1997-12-31",
                        "kpi": "aov"
                    }),
                    sql: "SELECT ROUND(SUM(od.UnitPrice * od.Quantity * (1 - od.Discount)) / COUNT(DISTINCT o.OrderID), 2) AS aov \
                          FROM Orders o JOIN \"Order Details\" od ON od.OrderID = o.OrderID \
                          WHERE o.OrderDate BETWEEN '1997-12-01' AND '1997-12-31'"
                        .to_string(),
                },
                SqlExemplar {
                    question: "Which category had the highest total quantity sold in June 1997?".to_string(),
                    constraints: serde_json::json!({
                        "start_date": "1997-06-01",
                        "end_date": "1997-06-30"
                    }),
                    sql: "SELECT c.CategoryName, SUM(od.Quantity) AS quantity \
                          FROM Orders o JOIN \"Order Details\" od ON od.OrderID = o.OrderID \
                          JOIN Products p ON p.ProductID = od.ProductID \
                          JOIN Categories c ON c.CategoryID = p.CategoryID \
                          WHERE o.OrderDate BETWEEN '1997-06-01' AND '1997-06-30' \
                          GROUP BY c.CategoryName ORDER BY quantity DESC LIMIT 1"
                        .to_string(),
                },
            ],
        }
    }
}

impl PromptBundle {
    /// Load and validate a bundle from a JSON file.
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Err(AppError::not_found(format!("prompt bundle {}", path.display())));
        }
        let content = std::fs::read_to_string(path)?;
        let bundle: PromptBundle = serde_json::from_str(&content)
            .map_err(|e| AppError::config(format!("invalid prompt bundle {}: {}", path.display(), e)))?;
        bundle.validate().map_err(AppError::config)?;
        tracing::debug!(version = %bundle.version, exemplars = bundle.exemplars.len(), "loaded prompt bundle");
        Ok(bundle)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.version.trim().is_empty() {
            return Err("prompt bundle version must not be empty".to_string());
        }
        if self.instructions.trim().is_empty() {
            return Err("prompt bundle instructions must not be empty".to_string());
        }
        if let Some(i) = self.exemplars.iter().position(|e| e.sql.trim().is_empty()) {
            return Err(format!("prompt bundle exemplar {} has no sql", i));
        }
        Ok(())
    }

    /// Exemplars rendered as a few-shot block.
    pub fn render_exemplars(&self) -> String {
        self.exemplars
            .iter()
            .map(|e| {
                format!(
                    "Question: {}\nConstraints: {}\nSQL: {}",
                    e.question,
                    if e.constraints.is_null() { Value::Object(Default::default()) } else { e.constraints.clone() },
                    e.sql
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
