//! Step Module Contract
//!
//! Every model-backed step of the orchestration graph (Router, Planner,
//! SQL-Generator, Synthesizer) implements the same one-method trait:
//! typed input in, typed output out. Output that cannot be parsed into the
//! expected schema is reported as `StepError::ContractViolation` at the
//! boundary, never passed through as free-form text.
//!
//! Because the executor only sees `StepModule`, an inference backend or an
//! offline-tuned prompt bundle can be substituted without touching the graph.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

// ============================================================================
// StepError
// ============================================================================

/// Failure raised by a step module invocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    /// Output did not parse into the step's output schema.
    #[error("{step}: contract violation: {message}")]
    ContractViolation { step: String, message: String },

    /// The backing collaborator (model server, network) could not be reached.
    #[error("{step}: backend unavailable: {message}")]
    Unavailable { step: String, message: String },

    /// The step did not answer within its time budget.
    #[error("{step}: timed out after {seconds}s")]
    Timeout { step: String, seconds: u64 },
}

/// Result type alias for step invocations
pub type StepResult<T> = Result<T, StepError>;

impl StepError {
    /// Create a contract violation for the named step
    pub fn contract(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ContractViolation {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Create an unavailable error for the named step
    pub fn unavailable(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Infrastructure failures are fatal to a run; content failures may be repaired.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, StepError::Unavailable { .. })
    }
}

// ============================================================================
// StepModule
// ============================================================================

/// A model-backed, schema-validated transformation used by one graph node.
#[async_trait]
pub trait StepModule: Send + Sync {
    /// Typed input assembled by the node from run state.
    type Input: Send + 'static;
    /// Typed output written back to run state by the node.
    type Output: Send + 'static;

    /// Stable name used in logs and error messages (e.g. "router").
    fn name(&self) -> &'static str;

    /// Run the step.
    ///
    /// # Errors
    /// - `StepError::ContractViolation` if the backend output cannot be parsed
    /// - `StepError::Unavailable` if the backend cannot be reached
    async fn invoke(&self, input: Self::Input) -> StepResult<Self::Output>;
}

/// Shared, type-erased step module handle.
pub type DynStep<I, O> = Arc<dyn StepModule<Input = I, Output = O>>;
