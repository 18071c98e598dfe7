//! Orchestration Graph
//!
//! Typed run state, node identifiers, the pure transition policy and the
//! executor that ties them to the step modules, document index and
//! structured store.

pub mod executor;
pub mod node;
pub mod policy;
pub mod state;

pub use executor::{GraphExecutor, StepSet};
pub use node::NodeId;
pub use policy::{next_node, on_failure, NodeFailure, RepairLimits, Transition};
pub use state::{RepairTarget, RunState, RunStatus, SqlOutcome};
