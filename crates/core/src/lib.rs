//! Retail Copilot Core
//!
//! Contract errors, the uniform step module contract, and the typed
//! inputs/outputs exchanged between the orchestration graph and its step
//! modules. This crate has zero dependencies on application-level code
//! (database, LLM providers, CLI, etc.).
//!
//! ## Module Organization
//!
//! - `error` - Values that do not fit a contract (`ContractError`)
//! - `step` - Step module trait (`StepModule`) and step failures (`StepError`)
//! - `contracts` - Typed step inputs/outputs (`Route`, `Constraints`, `SynthesisOutput`, ...)
//!
//! ## Design Principles
//!
//! 1. **No external dependencies beyond serde, async-trait, thiserror and chrono**
//! 2. **One method per step module** - any backend or tuned prompt bundle can be swapped in
//! 3. **Unidirectional dependency** - this crate depends on nothing else in the workspace

pub mod contracts;
pub mod error;
pub mod step;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::ContractError;

// ── Step Module Contract ───────────────────────────────────────────────
pub use step::{DynStep, StepError, StepModule, StepResult};

// ── Step Inputs/Outputs ────────────────────────────────────────────────
pub use contracts::{
    ColumnSchema, ConstraintKey, Constraints, PlanInput, RetrievedChunk, Route, RouteInput,
    Schema, SqlEvidence, SqlGenInput, SynthesisInput, SynthesisOutput, TableSchema,
};
