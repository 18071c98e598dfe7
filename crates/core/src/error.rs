//! Contract Errors
//!
//! Raised when raw text or JSON cannot become one of the typed step
//! contracts. Step modules turn these into `StepError::ContractViolation`
//! at their boundary, so they never reach the graph directly.

use thiserror::Error;

/// A value that does not fit a typed contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    /// Router label outside `rag`, `sql` and `hybrid`.
    #[error("unknown route label: {0}")]
    UnknownRoute(String),

    /// Plan key with no matching `ConstraintKey`.
    #[error("unrecognized constraint key: {0}")]
    UnknownConstraintKey(String),

    /// Recognized plan key whose value has the wrong shape.
    #[error("invalid value for {key}: {value}")]
    InvalidConstraint { key: &'static str, value: String },
}
