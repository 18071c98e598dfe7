//! Services
//!
//! Business logic: document retrieval, the LLM-backed step modules, the
//! orchestration graph, output formatting and the batch runner.

pub mod batch;
pub mod graph;
pub mod knowledge;
pub mod output;
pub mod steps;

pub use batch::{BatchRunner, BatchSummary};
pub use graph::{GraphExecutor, RunState, StepSet};
pub use knowledge::{Bm25Index, DocumentIndex};
