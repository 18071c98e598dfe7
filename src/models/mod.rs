//! Data Models
//!
//! Configuration and batch record types.

pub mod batch;
pub mod settings;

pub use batch::*;
pub use settings::*;
